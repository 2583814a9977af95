//! The place record handed to the analyzer.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::Row;

/// One row of indexing input. Only `place_id` is guaranteed; everything
/// else depends on the source table and the prefetch statement of the
/// current pass.
#[derive(Debug, Default, Clone)]
pub struct Place {
    pub place_id: i64,
    /// OSM name-tag variants (`name`, `name:en`, ...).
    pub name: Option<BTreeMap<String, String>>,
    /// Structured address parts (`housenumber`, `street`, `postcode`, ...).
    pub address: Option<BTreeMap<String, String>>,
    /// ISO country code for country features.
    pub country_feature: Option<String>,
    /// The address as an hstore literal, carried through for write-back.
    pub address_text: Option<String>,
}

impl Place {
    /// A bare place known only by id, for passes without prefetch.
    pub fn from_id(place_id: i64) -> Self {
        Place {
            place_id,
            ..Place::default()
        }
    }

    /// Decode a prefetch row. Columns other than `place_id` are optional;
    /// missing columns simply leave the attribute unset.
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Place {
            place_id: row.try_get("place_id")?,
            name: json_map(row, "name")?,
            address: json_map(row, "address")?,
            country_feature: opt_column(row, "country_feature")?,
            address_text: opt_column(row, "address_text")?,
        })
    }
}

fn opt_column(row: &PgRow, column: &str) -> Result<Option<String>, sqlx::Error> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

fn json_map(row: &PgRow, column: &str) -> Result<Option<BTreeMap<String, String>>, sqlx::Error> {
    let value = match row.try_get::<Option<JsonValue>, _>(column) {
        Ok(value) => value,
        Err(sqlx::Error::ColumnNotFound(_)) => None,
        Err(err) => return Err(err),
    };

    Ok(value.and_then(|value| match value {
        JsonValue::Object(entries) => {
            let map: BTreeMap<String, String> = entries
                .into_iter()
                .filter_map(|(key, value)| match value {
                    JsonValue::String(text) => Some((key, text)),
                    _ => None,
                })
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(map)
            }
        }
        _ => None,
    }))
}
