//! Disagreement scoring for a settled round
//!
//! A strategy maps the successful responses of one round to a score in
//! `[0, 1]`: 0 when the agents say the same thing, 1 when they share nothing.
//! Scores must be deterministic for a fixed transcript.

use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

/// Pluggable disagreement heuristic
pub trait DisagreementStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Score the responses; fewer than two responses score 0
    fn score(&self, responses: &[&str]) -> f64;
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "has", "have", "was",
    "with", "this", "that", "from", "they", "will", "would", "there", "their", "what", "which",
    "about", "into", "than", "then", "them", "these", "those", "its", "our", "also", "more",
];

fn word_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9$%]+").ok()).as_ref()
}

/// One minus the mean pairwise Jaccard similarity of content-word sets
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalDivergence;

impl LexicalDivergence {
    fn terms(text: &str) -> HashSet<String> {
        let Some(words) = word_regex() else {
            return HashSet::new();
        };
        words
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
            .collect()
    }

    fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let intersection = a.intersection(b).count();
        let union = a.union(b).count();
        intersection as f64 / union as f64
    }
}

impl DisagreementStrategy for LexicalDivergence {
    fn name(&self) -> &'static str {
        "lexical_divergence"
    }

    fn score(&self, responses: &[&str]) -> f64 {
        if responses.len() < 2 {
            return 0.0;
        }
        let sets: Vec<HashSet<String>> = responses.iter().map(|r| Self::terms(r)).collect();

        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                total += Self::jaccard(&sets[i], &sets[j]);
                pairs += 1;
            }
        }
        (1.0 - total / pairs as f64).clamp(0.0, 1.0)
    }
}

/// Spread of discrete stance labels across responses.
///
/// Each response's stance is the label that appears first in it (whole word,
/// case-insensitive). Responses without a stance are ignored. The score is the
/// share of stances outside the most common one, normalised so that an even
/// split across all responses scores 1.
#[derive(Debug, Clone)]
pub struct StanceVariance {
    labels: Vec<String>,
    pattern: Option<Regex>,
}

impl StanceVariance {
    /// Strategy over the given label set
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|l| l.into().trim().to_uppercase())
            .filter(|l| !l.is_empty())
            .collect();
        let alternation = labels
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = (!labels.is_empty())
            .then(|| Regex::new(&format!(r"(?i)\b({})\b", alternation)).ok())
            .flatten();
        Self { labels, pattern }
    }

    /// Labels in use
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Stance expressed by `text`, if any
    pub fn stance(&self, text: &str) -> Option<String> {
        self.pattern
            .as_ref()?
            .find(text)
            .map(|m| m.as_str().to_uppercase())
    }
}

impl Default for StanceVariance {
    fn default() -> Self {
        Self::new(["YES", "NO", "UNSURE"])
    }
}

impl DisagreementStrategy for StanceVariance {
    fn name(&self) -> &'static str {
        "stance_variance"
    }

    fn score(&self, responses: &[&str]) -> f64 {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for stance in responses.iter().filter_map(|r| self.stance(r)) {
            *counts.entry(stance).or_insert(0) += 1;
        }
        let n: usize = counts.values().sum();
        if n < 2 {
            return 0.0;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        let raw = 1.0 - top as f64 / n as f64;
        let max_spread = 1.0 - 1.0 / n.min(self.labels.len().max(1)) as f64;
        if max_spread <= 0.0 {
            return 0.0;
        }
        (raw / max_spread).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_identical_and_disjoint() {
        let strategy = LexicalDivergence;
        let same = "Refurbished workstation laptops offer the best value";
        assert_eq!(strategy.score(&[same, same]), 0.0);
        assert_eq!(
            strategy.score(&["apples oranges bananas", "engines gearbox brakes"]),
            1.0
        );
        assert_eq!(strategy.score(&[same]), 0.0);
    }

    #[test]
    fn test_lexical_is_deterministic_and_bounded() {
        let strategy = LexicalDivergence;
        let responses = [
            "Pick the Acer Swift with 16GB RAM",
            "The Acer Swift is fine but 32GB RAM matters for editing",
            "Go with a refurbished MacBook Air",
        ];
        let a = strategy.score(&responses);
        let b = strategy.score(&responses);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
        assert!(a > 0.0);
    }

    #[test]
    fn test_stance_detection() {
        let strategy = StanceVariance::new(["BUY", "SELL", "HOLD"]);
        assert_eq!(strategy.stance("I would hold for now, then buy"), Some("HOLD".into()));
        assert_eq!(strategy.stance("no opinion"), None);
        // whole words only
        assert_eq!(strategy.stance("the buyer is unknown"), None);
    }

    #[test]
    fn test_stance_variance() {
        let strategy = StanceVariance::new(["BUY", "SELL", "HOLD"]);
        assert_eq!(strategy.score(&["BUY", "buy now", "Buy."]), 0.0);
        assert_eq!(strategy.score(&["BUY", "SELL", "HOLD"]), 1.0);

        let split = strategy.score(&["BUY", "BUY", "HOLD"]);
        assert!((split - 0.5).abs() < 1e-9);

        // responses without a stance are ignored
        assert_eq!(strategy.score(&["BUY", "unclear"]), 0.0);
    }

    #[test]
    fn test_empty_label_set() {
        let strategy = StanceVariance::new(Vec::<String>::new());
        assert_eq!(strategy.stance("yes"), None);
        assert_eq!(strategy.score(&["yes", "no"]), 0.0);
    }

    #[test]
    fn test_word_pattern_compiles() {
        assert!(word_regex().is_some());
        assert!(LexicalDivergence::terms("Battery life matters").contains("battery"));
    }
}
