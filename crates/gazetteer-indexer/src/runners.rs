//! Per-pass SQL commands for the various indexing tasks.
//!
//! A runner parameterises one pass: how to count and enumerate the
//! pending rows, how to prefetch row detail and how to write the batched
//! update. Runners that tokenize hold their own [`NameAnalyzer`]; one
//! runner instance is bound to each worker so the analyzer caches stay
//! private to that worker.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use gazetteer_db::SqlValue;
use gazetteer_tokenizer::{NameAnalyzer, Place};

use crate::error::IndexerError;

/// SQL text plus its positional parameters.
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// One indexing pass over one source table.
#[async_trait]
pub trait Runner: Send {
    fn name(&self) -> String;

    /// `SELECT count(*)` over the rows the pass will touch; sizes the
    /// progress meter.
    fn sql_count_objects(&self) -> String;

    /// Enumeration of pending place_ids. The ordering maximises
    /// locality on the server side but is not a contract.
    fn sql_get_objects(&self) -> String;

    /// Optional prefetch of per-row payload for a slice of ids. Passes
    /// whose update needs nothing beyond the id skip this.
    fn sql_get_object_info(&self, ids: &[i64]) -> Option<Query> {
        let _ = ids;
        None
    }

    /// The batched UPDATE clearing indexed_status and writing the
    /// derived columns. Tokenizes through the bound analyzer where the
    /// table carries names or addresses.
    async fn sql_index_places(&mut self, places: &[Place]) -> Result<Query, IndexerError>;

    /// Release per-pass resources (the analyzer connection).
    async fn close(&mut self);
}

const PLACEX_FETCH_SQL: &str = "\
SELECT p.place_id, hstore_to_jsonb(p.name) AS name, \
       hstore_to_jsonb(p.address) AS address, \
       p.address::text AS address_text, \
       p.country_feature \
  FROM (SELECT place_id, (placex_prepare_update(placex)).* \
          FROM placex WHERE place_id = ANY($1)) p";

const OSMLINE_FETCH_SQL: &str = "\
SELECT x.place_id, hstore_to_jsonb(x.addr) AS address, x.addr::text AS address_text \
  FROM (SELECT place_id, get_interpolation_address(address, osm_id) AS addr \
          FROM location_property_osmline WHERE place_id = ANY($1)) x";

/// Tokenize every place of a batch and assemble the shared
/// `UPDATE ... FROM unnest(...)` statement for tables carrying an
/// address and a token_info column.
async fn tokenized_update(
    analyzer: &mut NameAnalyzer,
    table: &str,
    places: &[Place],
) -> Result<Query, IndexerError> {
    let mut ids: Vec<i64> = Vec::with_capacity(places.len());
    let mut addresses: Vec<Option<String>> = Vec::with_capacity(places.len());
    let mut payloads: Vec<JsonValue> = Vec::with_capacity(places.len());

    for place in places {
        let info = analyzer.tokenize(place).await?;
        ids.push(place.place_id);
        addresses.push(place.address_text.clone());
        payloads.push(serde_json::to_value(info)?);
    }

    Ok(Query {
        sql: format!(
            "UPDATE {table} \
                SET indexed_status = 0, address = v.addr::hstore, token_info = v.ti \
               FROM unnest($1::bigint[], $2::text[], $3::jsonb[]) AS v(id, addr, ti) \
              WHERE place_id = v.id"
        ),
        params: vec![
            SqlValue::BigIntArray(ids),
            SqlValue::TextArray(addresses),
            SqlValue::JsonArray(payloads),
        ],
    })
}

fn rank_count_sql(rank: i32) -> String {
    format!(
        "SELECT count(*) FROM placex \
          WHERE rank_address = {rank} and indexed_status > 0"
    )
}

fn rank_objects_sql(rank: i32) -> String {
    format!(
        "SELECT place_id FROM placex \
          WHERE indexed_status > 0 and rank_address = {rank} \
          ORDER BY geometry_sector"
    )
}

fn boundary_count_sql(rank: i32) -> String {
    format!(
        "SELECT count(*) FROM placex \
          WHERE indexed_status > 0 \
            AND rank_search = {rank} \
            AND class = 'boundary' and type = 'administrative'"
    )
}

fn boundary_objects_sql(rank: i32) -> String {
    format!(
        "SELECT place_id FROM placex \
          WHERE indexed_status > 0 and rank_search = {rank} \
                and class = 'boundary' and type = 'administrative' \
          ORDER BY partition, admin_level"
    )
}

/// Indexes one address rank of the placex table.
pub struct RankRunner {
    rank: i32,
    analyzer: NameAnalyzer,
}

impl RankRunner {
    pub fn new(rank: i32, analyzer: NameAnalyzer) -> Self {
        RankRunner { rank, analyzer }
    }
}

#[async_trait]
impl Runner for RankRunner {
    fn name(&self) -> String {
        format!("rank {}", self.rank)
    }

    fn sql_count_objects(&self) -> String {
        rank_count_sql(self.rank)
    }

    fn sql_get_objects(&self) -> String {
        rank_objects_sql(self.rank)
    }

    fn sql_get_object_info(&self, ids: &[i64]) -> Option<Query> {
        Some(Query {
            sql: PLACEX_FETCH_SQL.to_string(),
            params: vec![SqlValue::BigIntArray(ids.to_vec())],
        })
    }

    async fn sql_index_places(&mut self, places: &[Place]) -> Result<Query, IndexerError> {
        tokenized_update(&mut self.analyzer, "placex", places).await
    }

    async fn close(&mut self) {
        self.analyzer.close().await;
    }
}

/// Indexes the administrative boundaries of one search rank.
pub struct BoundaryRunner {
    rank: i32,
    analyzer: NameAnalyzer,
}

impl BoundaryRunner {
    pub fn new(rank: i32, analyzer: NameAnalyzer) -> Self {
        BoundaryRunner { rank, analyzer }
    }
}

#[async_trait]
impl Runner for BoundaryRunner {
    fn name(&self) -> String {
        format!("boundaries rank {}", self.rank)
    }

    fn sql_count_objects(&self) -> String {
        boundary_count_sql(self.rank)
    }

    fn sql_get_objects(&self) -> String {
        boundary_objects_sql(self.rank)
    }

    fn sql_get_object_info(&self, ids: &[i64]) -> Option<Query> {
        Some(Query {
            sql: PLACEX_FETCH_SQL.to_string(),
            params: vec![SqlValue::BigIntArray(ids.to_vec())],
        })
    }

    async fn sql_index_places(&mut self, places: &[Place]) -> Result<Query, IndexerError> {
        tokenized_update(&mut self.analyzer, "placex", places).await
    }

    async fn close(&mut self) {
        self.analyzer.close().await;
    }
}

/// Indexes the address interpolation lines.
pub struct InterpolationRunner {
    analyzer: NameAnalyzer,
}

impl InterpolationRunner {
    pub fn new(analyzer: NameAnalyzer) -> Self {
        InterpolationRunner { analyzer }
    }
}

#[async_trait]
impl Runner for InterpolationRunner {
    fn name(&self) -> String {
        "interpolation lines (location_property_osmline)".to_string()
    }

    fn sql_count_objects(&self) -> String {
        "SELECT count(*) FROM location_property_osmline \
          WHERE indexed_status > 0"
            .to_string()
    }

    fn sql_get_objects(&self) -> String {
        "SELECT place_id FROM location_property_osmline \
          WHERE indexed_status > 0 \
          ORDER BY geometry_sector"
            .to_string()
    }

    fn sql_get_object_info(&self, ids: &[i64]) -> Option<Query> {
        Some(Query {
            sql: OSMLINE_FETCH_SQL.to_string(),
            params: vec![SqlValue::BigIntArray(ids.to_vec())],
        })
    }

    async fn sql_index_places(&mut self, places: &[Place]) -> Result<Query, IndexerError> {
        tokenized_update(&mut self.analyzer, "location_property_osmline", places).await
    }

    async fn close(&mut self) {
        self.analyzer.close().await;
    }
}

/// Indexes the location_postcode table. The update only clears
/// indexed_status, so there is no prefetch and no analyzer.
pub struct PostcodeRunner;

#[async_trait]
impl Runner for PostcodeRunner {
    fn name(&self) -> String {
        "postcodes (location_postcode)".to_string()
    }

    fn sql_count_objects(&self) -> String {
        "SELECT count(*) FROM location_postcode WHERE indexed_status > 0".to_string()
    }

    fn sql_get_objects(&self) -> String {
        "SELECT place_id FROM location_postcode \
          WHERE indexed_status > 0 \
          ORDER BY country_code, postcode"
            .to_string()
    }

    async fn sql_index_places(&mut self, places: &[Place]) -> Result<Query, IndexerError> {
        let ids: Vec<i64> = places.iter().map(|place| place.place_id).collect();
        Ok(Query {
            sql: "UPDATE location_postcode SET indexed_status = 0 \
                  WHERE place_id = ANY($1)"
                .to_string(),
            params: vec![SqlValue::BigIntArray(ids)],
        })
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRunner;

    #[async_trait]
    impl Runner for NoRunner {
        fn name(&self) -> String {
            "no-op".to_string()
        }
        fn sql_count_objects(&self) -> String {
            String::new()
        }
        fn sql_get_objects(&self) -> String {
            String::new()
        }
        async fn sql_index_places(&mut self, _places: &[Place]) -> Result<Query, IndexerError> {
            Ok(Query {
                sql: String::new(),
                params: Vec::new(),
            })
        }
        async fn close(&mut self) {}
    }

    #[test]
    fn prefetch_is_optional_by_default() {
        assert!(NoRunner.sql_get_object_info(&[1, 2, 3]).is_none());
    }

    #[test]
    fn postcode_runner_counts_pending_rows_only() {
        assert_eq!(
            PostcodeRunner.sql_count_objects(),
            "SELECT count(*) FROM location_postcode WHERE indexed_status > 0"
        );
    }

    #[test]
    fn postcode_enumeration_orders_by_country_and_postcode() {
        let sql = PostcodeRunner.sql_get_objects();
        assert!(sql.contains("indexed_status > 0"));
        assert!(sql.contains("ORDER BY country_code, postcode"));
    }

    #[test]
    fn postcode_runner_has_no_prefetch() {
        assert!(PostcodeRunner.sql_get_object_info(&[1]).is_none());
    }

    #[tokio::test]
    async fn postcode_update_binds_the_id_list() {
        let places = vec![Place::from_id(1), Place::from_id(2), Place::from_id(3)];
        let query = PostcodeRunner.sql_index_places(&places).await.unwrap();
        assert!(query.sql.starts_with("UPDATE location_postcode"));
        assert!(query.sql.contains("indexed_status = 0"));
        assert!(matches!(
            query.params.as_slice(),
            [SqlValue::BigIntArray(ids)] if ids == &[1, 2, 3]
        ));
    }

    #[test]
    fn rank_statements_filter_on_address_rank() {
        assert_eq!(
            rank_count_sql(15),
            "SELECT count(*) FROM placex \
              WHERE rank_address = 15 and indexed_status > 0"
        );
        let sql = rank_objects_sql(15);
        assert!(sql.contains("rank_address = 15"));
        assert!(sql.ends_with("ORDER BY geometry_sector"));
    }

    #[test]
    fn boundary_statements_filter_on_search_rank_and_class() {
        let count = boundary_count_sql(8);
        assert!(count.contains("rank_search = 8"));
        assert!(count.contains("class = 'boundary' and type = 'administrative'"));
        let sql = boundary_objects_sql(8);
        assert!(sql.contains("rank_search = 8"));
        assert!(sql.ends_with("ORDER BY partition, admin_level"));
    }

    #[test]
    fn placex_prefetch_wraps_the_prepare_function() {
        assert!(PLACEX_FETCH_SQL.contains("placex_prepare_update(placex)"));
        assert!(PLACEX_FETCH_SQL.contains("hstore_to_jsonb"));
        assert!(PLACEX_FETCH_SQL.contains("address_text"));
    }

    #[test]
    fn osmline_prefetch_computes_the_interpolation_address() {
        assert!(OSMLINE_FETCH_SQL.contains("get_interpolation_address(address, osm_id)"));
        assert!(OSMLINE_FETCH_SQL.contains("address_text"));
    }
}
