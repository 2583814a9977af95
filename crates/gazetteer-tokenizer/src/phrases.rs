//! Special search phrases: wiki parsing and database maintenance.
//!
//! Phrases are curated as wiki tables, one page per language. The
//! importer downloads each page, extracts the phrase rows, filters them
//! through the configured black/white lists and hands the surviving set
//! to the analyzer, which reconciles it with the word table.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use sqlx::{Connection, PgConnection};
use tracing::{debug, warn};

use crate::analyzer::NameAnalyzer;
use crate::error::TokenizerError;

/// Languages scanned when no explicit selection is given.
pub const DEFAULT_LANGUAGES: [&str; 32] = [
    "af", "ar", "br", "ca", "cs", "de", "en", "es", "et", "eu", "fa", "fi", "fr", "gl", "hr", "hu",
    "ia", "is", "it", "ja", "mk", "nl", "no", "pl", "ps", "pt", "ru", "sk", "sl", "sv", "uk", "vi",
];

/// One row of the phrase wiki table: `label, class, type, operator`.
static OCCURRENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\| ([^\|]+) \|\| ([^\|]+) \|\| ([^\|]+) \|\| ([^\|]+) \|\| ([\-YN])").unwrap()
});
/// Some types were imported into the wiki with quotes (building="yes").
static STRAY_QUOTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""|&quot;"#).unwrap());
static SANE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").unwrap());

/// A searchable phrase: label plus the class/type pair it maps to and an
/// optional proximity operator (`near`, `in`; `-` for none).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecialPhrase {
    pub label: String,
    pub phrase_class: String,
    pub phrase_type: String,
    pub operator: String,
}

pub(crate) type PhraseKey = (String, String, String, String);

/// Operators other than `near` and `in` collapse to `-`, which is stored
/// as NULL.
pub(crate) fn normalize_operator(operator: &str) -> String {
    match operator {
        "near" | "in" => operator.to_string(),
        _ => "-".to_string(),
    }
}

/// Split the requested phrase set against the existing one into
/// `(to_add, to_delete)`, both sorted for deterministic statements.
pub(crate) fn phrase_set_diff(
    requested: &HashSet<PhraseKey>,
    existing: &HashSet<PhraseKey>,
) -> (Vec<PhraseKey>, Vec<PhraseKey>) {
    let mut to_add: Vec<PhraseKey> = requested.difference(existing).cloned().collect();
    let mut to_delete: Vec<PhraseKey> = existing.difference(requested).cloned().collect();
    to_add.sort();
    to_delete.sort();
    (to_add, to_delete)
}

/// Class/type filter lists loaded from a JSON settings file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhraseSettings {
    /// Disallowed types per class.
    pub black_list: HashMap<String, Vec<String>>,
    /// If a class is listed here, only the listed types are allowed.
    pub white_list: HashMap<String, Vec<String>>,
}

impl PhraseSettings {
    pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| TokenizerError::Settings(format!("{}: {}", path.display(), err)))?;
        serde_json::from_str(&raw).map_err(|err| TokenizerError::Settings(err.to_string()))
    }

    fn allows(&self, class: &str, kind: &str) -> bool {
        if let Some(types) = self.black_list.get(class) {
            if types.iter().any(|t| t == kind) {
                return false;
            }
        }
        if let Some(types) = self.white_list.get(class) {
            if !types.iter().any(|t| t == kind) {
                return false;
            }
        }
        true
    }
}

/// Extract the phrases of one wiki page. Rows with garbage in the class
/// or type column are logged and skipped so that a single bad entry
/// cannot abort a multi-language import.
pub fn parse_wiki_page(content: &str, lang: &str, settings: &PhraseSettings) -> Vec<SpecialPhrase> {
    let mut phrases = Vec::new();

    for caps in OCCURRENCE.captures_iter(content) {
        let label = caps[1].trim().to_string();
        let class = caps[2].trim().to_string();
        let kind = STRAY_QUOTES.replace_all(caps[3].trim(), "").to_string();
        let operator = normalize_operator(caps[4].trim());

        if !settings.allows(&class, &kind) {
            continue;
        }
        if !SANE_TAG.is_match(&class) || !SANE_TAG.is_match(&kind) {
            warn!("Bad class/type for language {}: {}={}", lang, class, kind);
            continue;
        }

        phrases.push(SpecialPhrase {
            label,
            phrase_class: class,
            phrase_type: kind,
            operator,
        });
    }

    phrases
}

/// Imports special phrases from the OSM wiki into the database.
pub struct SpecialPhrasesImporter {
    dsn: String,
    languages: Vec<String>,
    settings: PhraseSettings,
    client: reqwest::Client,
}

impl SpecialPhrasesImporter {
    /// An empty language list selects [`DEFAULT_LANGUAGES`].
    pub fn new(dsn: &str, languages: Vec<String>, settings: PhraseSettings) -> Self {
        let languages = if languages.is_empty() {
            DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect()
        } else {
            languages
        };
        SpecialPhrasesImporter {
            dsn: dsn.to_string(),
            languages,
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Download all configured languages, update the word table through
    /// the analyzer and reconcile the per-class/type lookup tables.
    pub async fn import_from_wiki(
        &self,
        analyzer: &mut NameAnalyzer,
    ) -> Result<(), TokenizerError> {
        let mut phrases: Vec<SpecialPhrase> = Vec::new();
        let mut seen: HashSet<SpecialPhrase> = HashSet::new();

        for lang in &self.languages {
            warn!("Importing phrases for language: {}", lang);
            let content = self.wiki_page(lang).await?;
            for phrase in parse_wiki_page(&content, lang, &self.settings) {
                if seen.insert(phrase.clone()) {
                    phrases.push(phrase);
                }
            }
        }

        analyzer.update_special_phrases(&phrases).await?;
        self.update_classtype_tables(&phrases).await?;
        warn!("Import done.");
        Ok(())
    }

    async fn wiki_page(&self, lang: &str) -> Result<String, TokenizerError> {
        let url = format!(
            "https://wiki.openstreetmap.org/wiki/Special:Export/Nominatim/Special_Phrases/{}",
            lang.to_uppercase()
        );
        Ok(self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    /// Create a `place_classtype_<class>_<type>` lookup table for every
    /// imported pair and drop tables whose pair disappeared from the
    /// wiki.
    async fn update_classtype_tables(
        &self,
        phrases: &[SpecialPhrase],
    ) -> Result<(), TokenizerError> {
        let mut conn = PgConnection::connect(&self.dsn).await?;

        let pairs: BTreeSet<(&str, &str)> = phrases
            .iter()
            .map(|p| (p.phrase_class.as_str(), p.phrase_type.as_str()))
            .collect();

        let existing: HashSet<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
              WHERE table_schema = 'public' AND table_name LIKE 'place_classtype_%'",
        )
        .fetch_all(&mut conn)
        .await?
        .into_iter()
        .collect();

        // The per-pair CREATE TABLE selects filter placex on (class,
        // type); index the pair for the duration of the loop.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_placex_classtype ON placex (class, type)")
            .execute(&mut conn)
            .await?;

        let mut keep: HashSet<String> = HashSet::new();
        for (class, kind) in pairs {
            // parse_wiki_page guarantees \w+, making the names spliceable
            if !SANE_TAG.is_match(class) || !SANE_TAG.is_match(kind) {
                warn!("Skipping phrase table for unsafe pair {}={}", class, kind);
                continue;
            }
            let table = format!("place_classtype_{}_{}", class, kind);
            if existing.contains(&table) {
                keep.insert(table);
                continue;
            }

            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} AS \
                 SELECT place_id, st_centroid(geometry) AS centroid \
                   FROM placex WHERE class = '{class}' AND type = '{kind}'"
            ))
            .execute(&mut conn)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_centroid \
                 ON {table} USING GIST (centroid)"
            ))
            .execute(&mut conn)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_place_id \
                 ON {table} USING btree(place_id)"
            ))
            .execute(&mut conn)
            .await?;
            keep.insert(table);
        }

        sqlx::query("DROP INDEX IF EXISTS idx_placex_classtype")
            .execute(&mut conn)
            .await?;

        for table in existing {
            if !keep.contains(&table) {
                debug!("Dropping obsolete phrase table {}", table);
                sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                    .execute(&mut conn)
                    .await?;
            }
        }

        let _ = conn.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<page>
<text>
{| class="wikitable sortable"
! Phrase !! Key !! Value !! Operator !! Plural
|-
| Zip Line || aerialway || zip_line || - || N
|-
| Zip Lines || aerialway || zip_line || - || Y
|-
| Zip Line in || aerialway || zip_line || in || N
|-
| Zip Lines near || aerialway || zip_line || near || Y
|-
| Embassies || amenity || embassy || - || Y
|-
| Bad tag || amenity || bad;dog || - || Y
|-
| Yes building || building || "yes" || - || N
|}
</text>
</page>
"#;

    fn phrase(label: &str, class: &str, kind: &str, operator: &str) -> SpecialPhrase {
        SpecialPhrase {
            label: label.to_string(),
            phrase_class: class.to_string(),
            phrase_type: kind.to_string(),
            operator: operator.to_string(),
        }
    }

    #[test]
    fn wiki_rows_are_extracted() {
        let phrases = parse_wiki_page(SAMPLE, "en", &PhraseSettings::default());
        assert!(phrases.contains(&phrase("Zip Line", "aerialway", "zip_line", "-")));
        assert!(phrases.contains(&phrase("Zip Line in", "aerialway", "zip_line", "in")));
        assert!(phrases.contains(&phrase("Zip Lines near", "aerialway", "zip_line", "near")));
        assert!(phrases.contains(&phrase("Embassies", "amenity", "embassy", "-")));
    }

    #[test]
    fn garbage_rows_are_skipped() {
        let phrases = parse_wiki_page(SAMPLE, "en", &PhraseSettings::default());
        assert!(!phrases.iter().any(|p| p.phrase_type.contains(';')));
    }

    #[test]
    fn quoted_types_are_cleaned() {
        let phrases = parse_wiki_page(SAMPLE, "en", &PhraseSettings::default());
        assert!(phrases.contains(&phrase("Yes building", "building", "yes", "-")));
    }

    #[test]
    fn unknown_operators_collapse_to_dash() {
        assert_eq!(normalize_operator("near"), "near");
        assert_eq!(normalize_operator("in"), "in");
        assert_eq!(normalize_operator("-"), "-");
        assert_eq!(normalize_operator("nahe"), "-");
    }

    #[test]
    fn black_list_filters_class_type_pairs() {
        let mut settings = PhraseSettings::default();
        settings
            .black_list
            .insert("amenity".to_string(), vec!["embassy".to_string()]);
        let phrases = parse_wiki_page(SAMPLE, "en", &settings);
        assert!(!phrases.iter().any(|p| p.phrase_type == "embassy"));
        assert!(phrases.iter().any(|p| p.phrase_class == "aerialway"));
    }

    #[test]
    fn white_list_restricts_to_listed_types() {
        let mut settings = PhraseSettings::default();
        settings
            .white_list
            .insert("aerialway".to_string(), vec!["cable_car".to_string()]);
        let phrases = parse_wiki_page(SAMPLE, "en", &settings);
        assert!(!phrases.iter().any(|p| p.phrase_class == "aerialway"));
        assert!(phrases.iter().any(|p| p.phrase_class == "amenity"));
    }

    #[test]
    fn settings_parse_wiki_style_json() {
        let raw = r#"{"blackList": {"boundary": ["administrative"]},
                      "whiteList": {"highway": ["bus_stop", "rest_area"]}}"#;
        let settings: PhraseSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.black_list["boundary"], vec!["administrative"]);
        assert_eq!(settings.white_list["highway"].len(), 2);
    }

    fn key(label: &str, class: &str, kind: &str, operator: &str) -> PhraseKey {
        (
            label.to_string(),
            class.to_string(),
            kind.to_string(),
            operator.to_string(),
        )
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let set: HashSet<PhraseKey> = [key("A", "c", "t", "-"), key("B", "c", "t", "-")]
            .into_iter()
            .collect();
        let (to_add, to_delete) = phrase_set_diff(&set, &set);
        assert!(to_add.is_empty());
        assert!(to_delete.is_empty());
    }

    #[test]
    fn diff_computes_additions_and_removals() {
        let existing: HashSet<PhraseKey> = [key("A", "c", "t", "-"), key("B", "c", "t", "-")]
            .into_iter()
            .collect();
        let requested: HashSet<PhraseKey> = [key("A", "c", "t", "-"), key("C", "c", "t", "-")]
            .into_iter()
            .collect();
        let (to_add, to_delete) = phrase_set_diff(&requested, &existing);
        assert_eq!(to_add, vec![key("C", "c", "t", "-")]);
        assert_eq!(to_delete, vec![key("B", "c", "t", "-")]);
    }

    #[test]
    fn same_phrase_with_different_operator_is_distinct() {
        let existing: HashSet<PhraseKey> = [key("A", "c", "t", "-")].into_iter().collect();
        let requested: HashSet<PhraseKey> = [key("A", "c", "t", "near")].into_iter().collect();
        let (to_add, to_delete) = phrase_set_diff(&requested, &existing);
        assert_eq!(to_add.len(), 1);
        assert_eq!(to_delete.len(), 1);
    }
}
