//! Keyword matching: case-insensitive substring containment over an OR-set.

use keywatch_common::normalize_keyword;

/// A request's keyword OR-set, normalized at construction. A message matches
/// the set when it contains at least one term as a substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    terms: Vec<String>,
}

impl KeywordSet {
    /// Build from raw strings. Entries that normalize to empty are dropped;
    /// duplicates are kept once, preserving first-seen order.
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = Vec::new();
        for entry in raw {
            if let Some(term) = normalize_keyword(entry.as_ref()) {
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Terms contained in `lowered_text`. The caller lower-cases the message
    /// body once per message, not once per keyword; empty text never matches.
    pub fn matched_terms<'a>(&'a self, lowered_text: &str) -> Vec<&'a str> {
        if lowered_text.is_empty() || self.terms.is_empty() {
            return Vec::new();
        }
        self.terms
            .iter()
            .filter(|term| lowered_text.contains(term.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(terms: &[&str]) -> KeywordSet {
        KeywordSet::new(terms.iter().copied())
    }

    #[test]
    fn matches_case_insensitively() {
        let keywords = set(&["iPhone"]);
        assert_eq!(
            keywords.matched_terms(&"selling my IPHONE 13".to_lowercase()),
            vec!["iphone"]
        );
    }

    #[test]
    fn reports_every_matched_term() {
        let keywords = set(&["macbook", "iphone", "ipad"]);
        let matched = keywords.matched_terms("trade: macbook pro for iphone 15");
        assert_eq!(matched, vec!["macbook", "iphone"]);
    }

    #[test]
    fn or_set_needs_only_one_term() {
        let keywords = set(&["bike", "phone"]);
        assert_eq!(keywords.matched_terms("new bike for sale"), vec!["bike"]);
    }

    #[test]
    fn empty_set_never_matches() {
        let keywords = set(&[]);
        assert!(keywords.matched_terms("anything at all").is_empty());
    }

    #[test]
    fn empty_text_never_matches() {
        let keywords = set(&["anything"]);
        assert!(keywords.matched_terms("").is_empty());
    }

    #[test]
    fn blank_entries_are_dropped() {
        let keywords = set(&["  ", "", "iphone"]);
        assert_eq!(keywords.terms(), ["iphone".to_string()]);
    }

    #[test]
    fn duplicate_entries_kept_once() {
        let keywords = set(&["iPhone", "IPHONE", "iphone "]);
        assert_eq!(keywords.len(), 1);
    }

    #[test]
    fn matches_substrings_inside_words() {
        // Containment, not word boundaries: "phone" hits "iphone" too.
        let keywords = set(&["phone"]);
        assert_eq!(keywords.matched_terms("selling iphone 13"), vec!["phone"]);
    }

    #[test]
    fn matches_non_ascii_text() {
        let keywords = set(&["Отдам"]);
        assert_eq!(
            keywords.matched_terms(&"ОТДАМ даром диван".to_lowercase()),
            vec!["отдам"]
        );
    }
}
