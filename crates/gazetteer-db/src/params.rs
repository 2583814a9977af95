//! Dynamic parameter values for runner-generated SQL.
//!
//! Runners build their statements as plain SQL text plus a positional
//! parameter list. The worker layer binds the values without knowing
//! which runner produced them, so the value set is closed over the types
//! the indexing statements actually use.

use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

/// A single positional parameter for a runner statement.
#[derive(Debug, Clone)]
pub enum SqlValue {
    BigInt(i64),
    Text(String),
    /// `bigint[]`, used for id lists (`place_id = ANY($n)`).
    BigIntArray(Vec<i64>),
    /// `text[]` with NULL elements, used for hstore literals in batched
    /// updates where a row may carry no address.
    TextArray(Vec<Option<String>>),
    /// `jsonb[]`, used for the per-row token_info payloads.
    JsonArray(Vec<JsonValue>),
}

impl SqlValue {
    /// Bind this value as the next positional parameter of `query`.
    pub fn bind(self, query: Query<'_, Postgres, PgArguments>) -> Query<'_, Postgres, PgArguments> {
        match self {
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::BigIntArray(v) => query.bind(v),
            SqlValue::TextArray(v) => query.bind(v),
            SqlValue::JsonArray(v) => query.bind(v),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<i64>> for SqlValue {
    fn from(v: Vec<i64>) -> Self {
        SqlValue::BigIntArray(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_impls_pick_the_expected_variant() {
        assert!(matches!(SqlValue::from(42i64), SqlValue::BigInt(42)));
        assert!(matches!(
            SqlValue::from("x".to_string()),
            SqlValue::Text(ref s) if s == "x"
        ));
        assert!(matches!(
            SqlValue::from(vec![1i64, 2, 3]),
            SqlValue::BigIntArray(ref v) if v == &[1, 2, 3]
        ));
    }
}
