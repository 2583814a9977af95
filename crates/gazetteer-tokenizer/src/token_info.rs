//! The JSON payload written into an indexed row.

use std::collections::BTreeMap;

use serde::Serialize;

/// Precomputed search terms for one place. Every field is optional;
/// absent fields mean the place has no such attribute, so they are left
/// out of the serialized document entirely.
///
/// The integer-array fields carry the text encoding produced by the SQL
/// side (e.g. `{12,344,here}` arrays rendered as `"{12,344}"`), which
/// the consuming triggers cast back.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    /// Token ids for all name variants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<String>,

    /// Housenumber token ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hnr_search: Option<String>,
    /// Semicolon-joined normalized housenumbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hnr_match: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_search: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_search: Option<String>,

    /// Terms for the remaining address parts: key to
    /// `[addr_ids, word_ids]`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub addr: BTreeMap<String, (String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;

    fn to_json(info: &TokenInfo) -> JsonValue {
        serde_json::to_value(info).expect("token payload serializes")
    }

    #[test]
    fn empty_payload_serializes_to_empty_object() {
        assert_eq!(to_json(&TokenInfo::default()), serde_json::json!({}));
    }

    #[test]
    fn absent_fields_are_omitted() {
        let info = TokenInfo {
            names: Some("{1,2,3}".to_string()),
            ..TokenInfo::default()
        };
        assert_eq!(to_json(&info), serde_json::json!({"names": "{1,2,3}"}));
    }

    #[test]
    fn addr_pairs_serialize_as_arrays() {
        let mut info = TokenInfo::default();
        info.addr
            .insert("city".to_string(), ("{7}".to_string(), "{8,9}".to_string()));
        assert_eq!(
            to_json(&info),
            serde_json::json!({"addr": {"city": ["{7}", "{8,9}"]}})
        );
    }

    #[test]
    fn housenumber_fields_serialize_side_by_side() {
        let info = TokenInfo {
            hnr_search: Some("{11,12}".to_string()),
            hnr_match: Some("1;2".to_string()),
            ..TokenInfo::default()
        };
        assert_eq!(
            to_json(&info),
            serde_json::json!({"hnr_search": "{11,12}", "hnr_match": "1;2"})
        );
    }
}
