//! Encoding of string maps as hstore literals.
//!
//! The analyzer procedures (`make_keywords`, `create_country`) take
//! hstore arguments. sqlx has no codec for the extension type, so maps
//! travel as quoted literals that the statement casts with `::hstore`.

use std::collections::BTreeMap;

/// Render a key/value map as an hstore literal, e.g.
/// `"name"=>"Berlin", "name:en"=>"Berlin"`.
pub fn literal(map: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if !out.is_empty() {
            out.push_str(", ");
        }
        quote_into(&mut out, key);
        out.push_str("=>");
        quote_into(&mut out, value);
    }
    out
}

fn quote_into(out: &mut String, raw: &str) {
    out.push('"');
    for ch in raw.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}
