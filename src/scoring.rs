use std::collections::{HashMap, HashSet};

use crate::models::RiskLevel;

/// Lowercased alphanumeric tokens of `text`.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard similarity of the word sets of two strings. Two texts without any
/// words are treated as identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let left = word_set(a);
    let right = word_set(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

/// Keeps items in their original order, dropping any item whose key is at
/// least `threshold` similar to an item already kept. Returns the survivors
/// and the number of dropped items.
pub fn dedup_by_similarity<T, F>(items: Vec<T>, threshold: f64, key: F) -> (Vec<T>, usize)
where
    F: Fn(&T) -> &str,
{
    dedup_within_groups(items, threshold, |_| "", key)
}

/// Same as [`dedup_by_similarity`], but an item is only compared with kept
/// items of its own group.
pub fn dedup_within_groups<T, G, F>(items: Vec<T>, threshold: f64, group: G, key: F) -> (Vec<T>, usize)
where
    G: Fn(&T) -> &str,
    F: Fn(&T) -> &str,
{
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    let mut kept_words: HashMap<String, Vec<HashSet<String>>> = HashMap::new();
    let mut dropped = 0;

    for item in items {
        let words = word_set(key(&item));
        let seen = kept_words.entry(group(&item).to_string()).or_default();
        if seen.iter().any(|existing| set_similarity(existing, &words) >= threshold) {
            dropped += 1;
        } else {
            seen.push(words);
            kept.push(item);
        }
    }

    (kept, dropped)
}

fn set_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Case-insensitive keyword test. A keyword only matches where a word starts,
/// so `low` is found in "low priority" and "lower" but not in "allow".
pub fn contains_term(text: &str, term: &str) -> bool {
    let haystack = text.to_lowercase();
    let needle = term.to_lowercase();
    contains_term_lowered(&haystack, &needle)
}

fn contains_term_lowered(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |prev| !prev.is_alphanumeric())
    })
}

pub fn matched_terms<'a>(text: &str, terms: &'a [String]) -> Vec<&'a str> {
    let haystack = text.to_lowercase();
    terms
        .iter()
        .filter(|term| contains_term_lowered(&haystack, &term.to_lowercase()))
        .map(|term| term.as_str())
        .collect()
}

pub fn contains_any(text: &str, terms: &[String]) -> bool {
    !matched_terms(text, terms).is_empty()
}

/// First entry of an ordered keyword table with a hit in `text`, else `default`.
pub fn classify<T: Copy>(text: &str, table: &[(T, Vec<String>)], default: T) -> T {
    table
        .iter()
        .find(|(_, terms)| contains_any(text, terms))
        .map(|(value, _)| *value)
        .unwrap_or(default)
}

/// Shared by the effort and duration estimates.
pub fn risk_multiplier(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Low => 0.8,
        RiskLevel::Medium => 1.0,
        RiskLevel::High => 1.5,
        RiskLevel::Critical => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard_bounds() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert_eq!(jaccard_similarity("", ""), 1.0);
        let half = jaccard_similarity("alpha beta", "alpha gamma");
        assert!((half - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_jaccard_ignores_case_and_punctuation() {
        assert_eq!(jaccard_similarity("The system shall log.", "the SYSTEM shall log"), 1.0);
    }

    #[test]
    fn test_word_start_matching() {
        assert!(contains_term("Low priority item", "low"));
        assert!(!contains_term("Users shall be allowed", "low"));
        assert!(contains_term("encrypted at rest", "encrypt"));
        assert!(contains_term("protect patient data.", "patient data"));
        assert!(!contains_term("anything", ""));
    }

    #[test]
    fn test_dedup_keeps_first_seen() {
        let items = vec![
            "the system shall store patient records securely at rest",
            "the system shall store patient records securely at rest always",
            "users can export reports",
        ];
        let (kept, dropped) = dedup_by_similarity(items, 0.8, |s| *s);
        assert_eq!(dropped, 1);
        assert_eq!(kept, vec![
            "the system shall store patient records securely at rest",
            "users can export reports",
        ]);

        let (again, dropped_again) = dedup_by_similarity(kept.clone(), 0.8, |s| *s);
        assert_eq!(again, kept);
        assert_eq!(dropped_again, 0);
    }

    #[test]
    fn test_dedup_threshold_is_inclusive() {
        // 4 shared words out of 5.
        let (kept, dropped) = dedup_by_similarity(vec!["a b c d", "a b c d e"], 0.8, |s| *s);
        assert_eq!(kept, vec!["a b c d"]);
        assert_eq!(dropped, 1);

        // 4 shared words out of 6.
        let (kept, _) = dedup_by_similarity(vec!["a b c d", "a b c d e f"], 0.8, |s| *s);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_dedup_within_groups_compares_only_same_group() {
        let items = vec![
            ("REQ-001", "Verify normal operation of REQ-001"),
            ("REQ-001.1", "Verify normal operation of REQ-001.1"),
            ("REQ-001", "Verify normal operation of REQ-001 again"),
        ];
        let (kept, dropped) = dedup_within_groups(items, 0.8, |item| item.0, |item| item.1);
        assert_eq!(dropped, 1);
        assert_eq!(kept.iter().map(|item| item.0).collect::<Vec<_>>(), vec!["REQ-001", "REQ-001.1"]);
    }

    #[test]
    fn test_classify_first_match_wins() {
        let table = vec![
            ("first", vec!["alpha".to_string()]),
            ("second", vec!["beta".to_string()]),
        ];
        assert_eq!(classify("beta alpha", &table, "none"), "first");
        assert_eq!(classify("beta", &table, "none"), "second");
        assert_eq!(classify("gamma", &table, "none"), "none");
    }
}
