//! Text helpers for verse display and search.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static RE_FOOTNOTE_SUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<sup[^>]*>.*?</sup>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip footnote markers and inline markup from translation text.
pub fn strip_markup(text: &str) -> String {
    let without_notes = RE_FOOTNOTE_SUP.replace_all(text, "");
    let without_tags = RE_TAG.replace_all(&without_notes, "");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    RE_WS.replace_all(decoded.trim(), " ").into_owned()
}

/// Fold text for diacritic- and case-insensitive matching.
pub fn fold_for_search(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether any of `fields` contains `query` after folding both sides.
pub fn matches_query(query: &str, fields: &[&str]) -> bool {
    let needle = fold_for_search(query.trim());
    if needle.is_empty() {
        return false;
    }
    fields
        .iter()
        .any(|field| fold_for_search(field).contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_footnotes_and_tags() {
        let raw = "All praise is for Allah<sup foot_note=77>1</sup>—Lord of all <i>worlds</i>,";
        assert_eq!(strip_markup(raw), "All praise is for Allah—Lord of all worlds,");
    }

    #[test]
    fn decodes_common_entities_and_collapses_space() {
        assert_eq!(strip_markup("  a&nbsp;&amp;\n b  "), "a & b");
    }

    #[test]
    fn search_ignores_case_and_diacritics() {
        assert!(matches_query("rahim", &["Ar-Raḥīm"]));
        assert!(matches_query("MERCIFUL", &["", "the Most Merciful"]));
        assert!(!matches_query("  ", &["anything"]));
        assert!(!matches_query("mercy", &["grace"]));
    }
}
