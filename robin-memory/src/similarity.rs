//! Keyword overlap between queries

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it", "of",
    "on", "or", "the", "to", "was", "what", "when", "where", "who", "with",
];

/// Lowercase keywords of a query, stopwords removed
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Number of keywords shared by two keyword sets
pub fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
    a.intersection(b).count()
}

/// Score `candidates` (newest first) against `query`, keeping those with
/// a positive score. Ties keep their input order, so recency wins.
pub fn rank_by_overlap<T>(query: &str, candidates: Vec<(T, &str)>, limit: usize) -> Vec<(T, usize)> {
    let wanted = keywords(query);
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(T, usize)> = candidates
        .into_iter()
        .filter_map(|(item, text)| {
            let score = overlap(&wanted, &keywords(text));
            (score > 0).then_some((item, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_drop_stopwords_and_punctuation() {
        let words = keywords("The Ransomware, and bitcoin-payments?");
        let words: Vec<_> = words.iter().map(String::as_str).collect();
        assert_eq!(words, vec!["bitcoin", "payments", "ransomware"]);
    }

    #[test]
    fn test_rank_ties_keep_recency() {
        let candidates = vec![
            (1, "bitcoin mixer"),
            (2, "bitcoin ransomware payment"),
            (3, "bitcoin wallet"),
            (4, "unrelated"),
        ];
        let ranked = rank_by_overlap("ransomware bitcoin", candidates, 10);
        assert_eq!(ranked, vec![(2, 2), (1, 1), (3, 1)]);
    }

    #[test]
    fn test_stopword_only_query_matches_nothing() {
        let ranked = rank_by_overlap("the and of", vec![(1, "the and of")], 5);
        assert!(ranked.is_empty());
    }
}
