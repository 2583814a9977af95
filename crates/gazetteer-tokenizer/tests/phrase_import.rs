//! End-to-end checks for the wiki phrase extraction pipeline.

use std::collections::HashSet;

use gazetteer_tokenizer::phrases::{parse_wiki_page, PhraseSettings};
use gazetteer_tokenizer::SpecialPhrase;

const PAGE_EN: &str = r#"
<mediawiki>
<page>
<title>Nominatim/Special Phrases/EN</title>
<text>
{| class="wikitable sortable"
! Phrase !! Key !! Value !! Operator !! Plural
|-
| Restaurant || amenity || restaurant || - || N
|-
| Restaurants || amenity || restaurant || - || Y
|-
| Restaurants in || amenity || restaurant || in || Y
|-
| Restaurants near || amenity || restaurant || near || Y
|-
| Zip Line || aerialway || zip_line || - || N
|-
| Animal shelter || amenity || animal_shelter || - || N
|}
</text>
</page>
</mediawiki>
"#;

const PAGE_DE: &str = r#"
<mediawiki>
<page>
<title>Nominatim/Special Phrases/DE</title>
<text>
{| class="wikitable sortable"
! Phrase !! Key !! Value !! Operator !! Plural
|-
| Restaurant || amenity || restaurant || - || N
|-
| Restaurants || amenity || restaurant || - || Y
|-
| Briefkasten || amenity || post_box || - || N
|-
| Kaputt || amenity || br0ken:tag || - || N
|}
</text>
</page>
</mediawiki>
"#;

fn settings_excluding_aerialway() -> PhraseSettings {
    serde_json::from_str(r#"{"blackList": {"aerialway": ["zip_line"]}}"#)
        .expect("valid settings json")
}

#[test]
fn multi_language_import_deduplicates_phrases() {
    let settings = PhraseSettings::default();
    let mut seen: HashSet<SpecialPhrase> = HashSet::new();
    let mut phrases: Vec<SpecialPhrase> = Vec::new();

    for (page, lang) in [(PAGE_EN, "en"), (PAGE_DE, "de")] {
        for phrase in parse_wiki_page(page, lang, &settings) {
            if seen.insert(phrase.clone()) {
                phrases.push(phrase);
            }
        }
    }

    // "Restaurant" and "Restaurants" appear on both pages but must be
    // imported once.
    let restaurant_labels: Vec<&str> = phrases
        .iter()
        .filter(|p| p.phrase_type == "restaurant")
        .map(|p| p.label.as_str())
        .collect();
    assert_eq!(
        restaurant_labels,
        vec!["Restaurant", "Restaurants", "Restaurants in", "Restaurants near"]
    );

    // The same label with different operators stays distinct.
    let operators: HashSet<&str> = phrases
        .iter()
        .filter(|p| p.phrase_type == "restaurant")
        .map(|p| p.operator.as_str())
        .collect();
    assert_eq!(operators, HashSet::from(["-", "in", "near"]));

    // The German-only phrase is present, the malformed one is not.
    assert!(phrases.iter().any(|p| p.label == "Briefkasten"));
    assert!(!phrases.iter().any(|p| p.label == "Kaputt"));
}

#[test]
fn black_list_applies_across_languages() {
    let settings = settings_excluding_aerialway();
    let phrases = parse_wiki_page(PAGE_EN, "en", &settings);

    assert!(!phrases.iter().any(|p| p.phrase_class == "aerialway"));
    assert!(phrases.iter().any(|p| p.phrase_class == "amenity"));
}

#[test]
fn phrase_identity_covers_all_four_columns() {
    let settings = PhraseSettings::default();
    let phrases = parse_wiki_page(PAGE_EN, "en", &settings);

    let in_variant = phrases
        .iter()
        .find(|p| p.label == "Restaurants in")
        .expect("operator variant parsed");
    assert_eq!(in_variant.phrase_class, "amenity");
    assert_eq!(in_variant.phrase_type, "restaurant");
    assert_eq!(in_variant.operator, "in");
}
