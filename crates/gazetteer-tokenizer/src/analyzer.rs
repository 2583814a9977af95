//! Per-worker analysis of place names against the word table.
//!
//! The analyzer owns a dedicated auto-commit connection. All writes to
//! the shared word table go through stored procedures that guard with
//! `WHERE NOT EXISTS`, so concurrent analyzers converge without any
//! application-level locking. The caches are private to the analyzer
//! and only ever skip round-trips for tokens that are already known to
//! exist.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info};

use crate::cache::LookupCache;
use crate::error::TokenizerError;
use crate::hstore;
use crate::phrases::{normalize_operator, phrase_set_diff, PhraseKey, SpecialPhrase};
use crate::place::Place;
use crate::token_info::TokenInfo;

const HOUSENUMBER_KEYS: [&str; 3] = ["housenumber", "streetnumber", "conscriptionnumber"];

/// Address keys handled by a dedicated code path and therefore excluded
/// from the generic address-term extraction.
const RESERVED_ADDRESS_KEYS: [&str; 8] = [
    "country",
    "street",
    "place",
    "postcode",
    "full",
    "housenumber",
    "streetnumber",
    "conscriptionnumber",
];

static COUNTRY_FEATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z][A-Za-z]$").unwrap());
static COUNTRY_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[a-z][a-z]$").unwrap());
static PLAIN_POSTCODE: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[^:;,]+$").unwrap());
static HOUSENUMBER_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new("[;,]").unwrap());

/// Turns place attributes into [`TokenInfo`] payloads and keeps the word
/// table stocked with every referenced token. Not thread-safe; one
/// instance per indexing worker.
pub struct NameAnalyzer {
    conn: Option<PgConnection>,
    /// Tokens for the plain housenumbers 1..100, immutable after init.
    housenumbers: HashMap<String, String>,
    streets: LookupCache<(String, String)>,
    places: LookupCache<(String, String)>,
    addr_terms: LookupCache<(String, String)>,
    postcodes: LookupCache<()>,
}

impl NameAnalyzer {
    pub(crate) async fn new(dsn: &str) -> Result<Self, TokenizerError> {
        let mut conn = PgConnection::connect(dsn).await?;

        // Integer housenumbers are already normalised, so the full range
        // can be resolved once up front.
        let rows: Vec<(i32, String)> = sqlx::query_as(
            "SELECT i, ARRAY[getorcreate_housenumber_id(i::text)]::text \
               FROM generate_series(1, 100) as i",
        )
        .fetch_all(&mut conn)
        .await?;
        let housenumbers = rows
            .into_iter()
            .map(|(num, tokens)| (num.to_string(), tokens))
            .collect();

        let mut postcodes = LookupCache::new(32);
        let known: Vec<Option<String>> =
            sqlx::query_scalar("SELECT word FROM word WHERE class = 'place' and type = 'postcode'")
                .fetch_all(&mut conn)
                .await?;
        for word in known.into_iter().flatten() {
            postcodes.seed(word, ());
        }

        Ok(NameAnalyzer {
            conn: Some(conn),
            housenumbers,
            streets: LookupCache::new(256),
            places: LookupCache::new(128),
            addr_terms: LookupCache::new(1024),
            postcodes,
        })
    }

    /// Shut down the analyzer and release its connection. Idempotent.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(
                streets = ?self.streets.stats(),
                places = ?self.places.stats(),
                addr_terms = ?self.addr_terms.stats(),
                postcodes = ?self.postcodes.stats(),
                "analyzer cache hits/misses"
            );
            let _ = conn.close().await;
        }
    }

    /// Compute the token payload for one place, creating any missing
    /// word entries on the way. Malformed attributes (bad country code,
    /// postcode with separators) are skipped and leave their field
    /// absent.
    pub async fn tokenize(&mut self, place: &Place) -> Result<TokenInfo, TokenizerError> {
        let mut info = TokenInfo::default();

        if let Some(names) = &place.name {
            self.add_names(&mut info, names, place.country_feature.as_deref())
                .await?;
        }

        if let Some(address) = &place.address {
            self.add_housenumbers(&mut info, address).await?;
            self.add_postcode(address.get("postcode").map(String::as_str))
                .await?;
            if let Some(street) = address.get("street") {
                let (matched, search) = self.street_place_terms(true, street).await?;
                info.street_match = Some(matched);
                info.street_search = Some(search);
            }
            if let Some(place_name) = address.get("place") {
                let (matched, search) = self.street_place_terms(false, place_name).await?;
                info.place_match = Some(matched);
                info.place_search = Some(search);
            }
            self.add_address_terms(&mut info, address).await?;
        }

        Ok(info)
    }

    /// Register the given names for a country. Country codes that are
    /// not two lowercase letters are ignored.
    pub async fn add_country_names(
        &mut self,
        country_code: &str,
        names: &[String],
    ) -> Result<(), TokenizerError> {
        if !COUNTRY_CODE.is_match(country_code) {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO word (word_id, word_token, country_code, search_name_count) \
             (SELECT nextval('seq_word'), lookup_token, $2, 0 \
                FROM (SELECT DISTINCT ' ' || make_standard_name(n) AS lookup_token \
                        FROM unnest($1::text[]) n) v \
               WHERE NOT EXISTS (SELECT * FROM word \
                                  WHERE word_token = lookup_token and country_code = $2))",
        )
        .bind(names)
        .bind(country_code)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    /// Replace the set of special phrases in the word table. Phrases
    /// already present are kept, new ones inserted and phrases missing
    /// from `phrases` deleted, all in one transaction. The reserved
    /// housenumber and postcode rows are never touched.
    pub async fn update_special_phrases(
        &mut self,
        phrases: &[SpecialPhrase],
    ) -> Result<(), TokenizerError> {
        let requested: HashSet<PhraseKey> = phrases
            .iter()
            .map(|phrase| {
                (
                    phrase.label.clone(),
                    phrase.phrase_class.clone(),
                    phrase.phrase_type.clone(),
                    normalize_operator(&phrase.operator),
                )
            })
            .collect();

        let mut tx = self.conn()?.begin().await?;

        let rows: Vec<(
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT word, class, type, operator FROM word \
              WHERE class != 'place' OR (type != 'house' AND type != 'postcode')",
        )
        .fetch_all(&mut *tx)
        .await?;
        let existing: HashSet<PhraseKey> = rows
            .into_iter()
            .filter_map(|(word, class, kind, operator)| {
                Some((
                    word?,
                    class?,
                    kind?,
                    operator.unwrap_or_else(|| "-".to_string()),
                ))
            })
            .collect();

        let (to_add, to_delete) = phrase_set_diff(&requested, &existing);

        if !to_add.is_empty() {
            let (labels, classes, kinds, operators) = unzip4(&to_add);
            sqlx::query(
                "INSERT INTO word (word_id, word_token, word, class, type, \
                                   search_name_count, operator) \
                 (SELECT nextval('seq_word'), ' ' || make_standard_name(name), name, \
                         class, type, 0, \
                         CASE WHEN op = 'near' OR op = 'in' THEN op ELSE null END \
                    FROM unnest($1::text[], $2::text[], $3::text[], $4::text[]) \
                         AS v(name, class, type, op))",
            )
            .bind(&labels)
            .bind(&classes)
            .bind(&kinds)
            .bind(&operators)
            .execute(&mut *tx)
            .await?;
        }

        if !to_delete.is_empty() {
            let (labels, classes, kinds, operators) = unzip4(&to_delete);
            sqlx::query(
                "DELETE FROM word \
                  USING unnest($1::text[], $2::text[], $3::text[], $4::text[]) \
                        AS v(name, in_class, in_type, op) \
                  WHERE word = v.name AND class = v.in_class AND type = v.in_type \
                    AND ((v.op = '-' AND operator IS NULL) OR operator = v.op)",
            )
            .bind(&labels)
            .bind(&classes)
            .bind(&kinds)
            .bind(&operators)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            "Special phrases updated: {} added, {} removed",
            to_add.len(),
            to_delete.len()
        );
        Ok(())
    }

    async fn add_names(
        &mut self,
        info: &mut TokenInfo,
        names: &BTreeMap<String, String>,
        country_feature: Option<&str>,
    ) -> Result<(), TokenizerError> {
        let literal = hstore::literal(names);
        let conn = self.conn()?;

        info.names = sqlx::query_scalar("SELECT make_keywords($1::hstore)::text")
            .bind(&literal)
            .fetch_one(&mut *conn)
            .await?;

        if let Some(code) = country_feature {
            if COUNTRY_FEATURE.is_match(code) {
                sqlx::query("SELECT create_country($1::hstore, $2)")
                    .bind(&literal)
                    .bind(code.to_lowercase())
                    .execute(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn add_housenumbers(
        &mut self,
        info: &mut TokenInfo,
        address: &BTreeMap<String, String>,
    ) -> Result<(), TokenizerError> {
        let hnrs: Vec<&str> = HOUSENUMBER_KEYS
            .iter()
            .filter_map(|key| address.get(*key))
            .map(String::as_str)
            .collect();
        if hnrs.is_empty() {
            return Ok(());
        }

        if let [single] = hnrs.as_slice() {
            if let Some(tokens) = self.housenumbers.get(*single) {
                info.hnr_search = Some(tokens.clone());
                info.hnr_match = Some((*single).to_string());
                return Ok(());
            }
        }

        let simple = split_housenumbers(&hnrs);
        if simple.is_empty() {
            return Ok(());
        }

        let (search, matched): (Option<String>, Option<String>) =
            sqlx::query_as("SELECT (create_housenumbers($1::text[])).*")
                .bind(&simple)
                .fetch_one(self.conn()?)
                .await?;
        info.hnr_search = search;
        info.hnr_match = matched;
        Ok(())
    }

    async fn add_postcode(&mut self, postcode: Option<&str>) -> Result<(), TokenizerError> {
        let Some(postcode) = postcode.and_then(normalize_postcode) else {
            return Ok(());
        };
        if self.postcodes.get(&postcode).is_some() {
            return Ok(());
        }

        sqlx::query("SELECT create_postcode_id($1)")
            .bind(&postcode)
            .execute(self.conn()?)
            .await?;
        self.postcodes.put(postcode, ());
        Ok(())
    }

    async fn street_place_terms(
        &mut self,
        is_street: bool,
        name: &str,
    ) -> Result<(String, String), TokenizerError> {
        let cached = if is_street {
            self.streets.get(name)
        } else {
            self.places.get(name)
        };
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let row: (Option<String>, Option<String>) = sqlx::query_as(
            "SELECT ARRAY[getorcreate_name_id(make_standard_name($1), '')]::text, \
                    word_ids_from_name($1)::text",
        )
        .bind(name)
        .fetch_one(self.conn()?)
        .await?;
        let terms = (
            row.0.unwrap_or_else(|| "{}".to_string()),
            row.1.unwrap_or_else(|| "{}".to_string()),
        );

        if is_street {
            self.streets.put(name.to_string(), terms.clone());
        } else {
            self.places.put(name.to_string(), terms.clone());
        }
        Ok(terms)
    }

    async fn add_address_terms(
        &mut self,
        info: &mut TokenInfo,
        address: &BTreeMap<String, String>,
    ) -> Result<(), TokenizerError> {
        for (key, value) in address {
            if RESERVED_ADDRESS_KEYS.contains(&key.as_str()) {
                continue;
            }
            let terms = self.address_terms(value).await?;
            info.addr.insert(key.clone(), terms);
        }
        Ok(())
    }

    async fn address_terms(&mut self, name: &str) -> Result<(String, String), TokenizerError> {
        if let Some(hit) = self.addr_terms.get(name) {
            return Ok(hit);
        }

        let row: (Option<String>, Option<String>) =
            sqlx::query_as("SELECT addr_ids_from_name($1)::text, word_ids_from_name($1)::text")
                .bind(name)
                .fetch_one(self.conn()?)
                .await?;
        let terms = (
            row.0.unwrap_or_else(|| "{}".to_string()),
            row.1.unwrap_or_else(|| "{}".to_string()),
        );
        self.addr_terms.put(name.to_string(), terms.clone());
        Ok(terms)
    }

    fn conn(&mut self) -> Result<&mut PgConnection, TokenizerError> {
        self.conn.as_mut().ok_or(TokenizerError::AnalyzerClosed)
    }
}

/// Normalise a postcode for lookup. Values containing list separators
/// are rejected; the rest is trimmed and upper-cased.
pub fn normalize_postcode(postcode: &str) -> Option<String> {
    let trimmed = postcode.trim();
    if trimmed.is_empty() || !PLAIN_POSTCODE.is_match(trimmed) {
        return None;
    }
    Some(trimmed.to_uppercase())
}

/// Split multi-value housenumber strings on `;` and `,`, trimming and
/// deduplicating while keeping first-seen order.
fn split_housenumbers(hnrs: &[&str]) -> Vec<String> {
    let mut simple: Vec<String> = Vec::new();
    for hnr in hnrs {
        for part in HOUSENUMBER_SPLIT.split(hnr) {
            let part = part.trim();
            if !part.is_empty() && !simple.iter().any(|seen| seen == part) {
                simple.push(part.to_string());
            }
        }
    }
    simple
}

fn unzip4(keys: &[PhraseKey]) -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
    let mut labels = Vec::with_capacity(keys.len());
    let mut classes = Vec::with_capacity(keys.len());
    let mut kinds = Vec::with_capacity(keys.len());
    let mut operators = Vec::with_capacity(keys.len());
    for (label, class, kind, operator) in keys {
        labels.push(label.clone());
        classes.push(class.clone());
        kinds.push(kind.clone());
        operators.push(operator.clone());
    }
    (labels, classes, kinds, operators)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postcode_with_separators_is_rejected() {
        assert_eq!(normalize_postcode("12345;67890"), None);
        assert_eq!(normalize_postcode("EC1A:1BB"), None);
        assert_eq!(normalize_postcode("a,b"), None);
    }

    #[test]
    fn postcode_is_trimmed_and_uppercased() {
        assert_eq!(normalize_postcode(" ec1a 1bb "), Some("EC1A 1BB".to_string()));
        assert_eq!(normalize_postcode("12345"), Some("12345".to_string()));
    }

    #[test]
    fn empty_postcode_is_rejected() {
        assert_eq!(normalize_postcode(""), None);
        assert_eq!(normalize_postcode("   "), None);
    }

    #[test]
    fn housenumbers_are_split_trimmed_and_deduplicated() {
        assert_eq!(
            split_housenumbers(&["3; 4a ,3", "5"]),
            vec!["3".to_string(), "4a".to_string(), "5".to_string()]
        );
    }

    #[test]
    fn country_feature_guard_accepts_mixed_case() {
        assert!(COUNTRY_FEATURE.is_match("DE"));
        assert!(COUNTRY_FEATURE.is_match("de"));
        assert!(!COUNTRY_FEATURE.is_match("DEU"));
        assert!(!COUNTRY_FEATURE.is_match("d"));
        assert!(!COUNTRY_FEATURE.is_match("d1"));
    }

    #[test]
    fn country_code_guard_requires_lowercase() {
        assert!(COUNTRY_CODE.is_match("de"));
        assert!(!COUNTRY_CODE.is_match("DE"));
        assert!(!COUNTRY_CODE.is_match("deu"));
    }

    #[test]
    fn reserved_keys_cover_all_special_address_paths() {
        for key in HOUSENUMBER_KEYS {
            assert!(RESERVED_ADDRESS_KEYS.contains(&key));
        }
        assert!(RESERVED_ADDRESS_KEYS.contains(&"street"));
        assert!(RESERVED_ADDRESS_KEYS.contains(&"place"));
        assert!(RESERVED_ADDRESS_KEYS.contains(&"postcode"));
    }

    #[test]
    fn unzip4_preserves_order() {
        let keys = vec![
            (
                "Bar".to_string(),
                "amenity".to_string(),
                "bar".to_string(),
                "-".to_string(),
            ),
            (
                "Pub".to_string(),
                "amenity".to_string(),
                "pub".to_string(),
                "near".to_string(),
            ),
        ];
        let (labels, classes, kinds, operators) = unzip4(&keys);
        assert_eq!(labels, vec!["Bar", "Pub"]);
        assert_eq!(classes, vec!["amenity", "amenity"]);
        assert_eq!(kinds, vec!["bar", "pub"]);
        assert_eq!(operators, vec!["-", "near"]);
    }
}
