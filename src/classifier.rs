//! Query classification
//!
//! [`classify`] is a pure function of the input text and the static tables in
//! this module: the same text always yields the same [`QueryAnalysis`].

use crate::types::Confidence;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Query categories. Declaration order breaks score ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum QueryType {
    Factual,
    Analytical,
    Comparative,
    Technical,
    Creative,
    Financial,
    CurrentEvents,
    Recommendation,
    /// Fallback for inputs that carry no signal
    General,
}

impl QueryType {
    /// Scored categories in declaration order (`General` is never scored)
    pub const SCORED: [QueryType; 8] = [
        QueryType::Factual,
        QueryType::Analytical,
        QueryType::Comparative,
        QueryType::Technical,
        QueryType::Creative,
        QueryType::Financial,
        QueryType::CurrentEvents,
        QueryType::Recommendation,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Analytical => "analytical",
            QueryType::Comparative => "comparative",
            QueryType::Technical => "technical",
            QueryType::Creative => "creative",
            QueryType::Financial => "financial",
            QueryType::CurrentEvents => "current_events",
            QueryType::Recommendation => "recommendation",
            QueryType::General => "general",
        }
    }

    fn keywords(&self) -> &'static [(&'static str, f64)] {
        match self {
            QueryType::Factual => &[
                ("what is", 1.5), ("who", 1.0), ("when", 1.0), ("where", 1.0), ("define", 1.5),
                ("definition", 1.5), ("fact", 1.0), ("history", 1.0), ("meaning", 1.0),
            ],
            QueryType::Analytical => &[
                ("why", 1.5), ("analyze", 2.0), ("analyse", 2.0), ("analysis", 2.0), ("explain", 1.0),
                ("impact", 1.5), ("cause", 1.0), ("implications", 1.5), ("evaluate", 1.5), ("assess", 1.5),
            ],
            QueryType::Comparative => &[
                ("compare", 2.0), ("comparison", 2.0), ("versus", 2.0), ("vs", 2.0), ("difference", 1.5),
                ("better", 1.0), ("pros and cons", 2.0), ("alternatives", 1.0),
            ],
            QueryType::Technical => &[
                ("code", 1.5), ("api", 1.5), ("algorithm", 2.0), ("implement", 1.5), ("debug", 2.0),
                ("error", 1.0), ("software", 1.0), ("database", 1.5), ("programming", 1.5), ("rust", 1.0),
                ("python", 1.0), ("architecture", 1.0),
            ],
            QueryType::Creative => &[
                ("write", 1.5), ("story", 2.0), ("poem", 2.0), ("imagine", 1.5), ("creative", 2.0),
                ("brainstorm", 2.0), ("slogan", 1.5), ("names for", 1.5),
            ],
            QueryType::Financial => &[
                ("stock", 2.0), ("invest", 2.0), ("investment", 2.0), ("price", 1.0), ("market", 1.5),
                ("earnings", 2.0), ("portfolio", 2.0), ("buy", 1.0), ("sell", 1.0), ("valuation", 2.0),
                ("dividend", 2.0), ("budget", 0.5),
            ],
            QueryType::CurrentEvents => &[
                ("latest", 1.5), ("news", 2.0), ("today", 1.5), ("recent", 1.5), ("recently", 1.5),
                ("current", 1.0), ("this week", 1.5), ("announced", 1.5), ("election", 1.5),
            ],
            QueryType::Recommendation => &[
                ("best", 2.0), ("recommend", 2.0), ("recommendation", 2.0), ("should i", 2.0),
                ("suggest", 1.5), ("top", 1.0), ("which", 1.0), ("budget", 1.0), ("under", 0.5),
            ],
            QueryType::General => &[],
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complexity bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum Complexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Complexity {
    fn from_signals(signals: usize) -> Self {
        match signals {
            0 => Complexity::Low,
            1 => Complexity::Medium,
            2 => Complexity::High,
            _ => Complexity::VeryHigh,
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Highest-scoring category
    pub primary_type: QueryType,
    /// Up to two further categories with a positive score
    pub secondary_types: Vec<QueryType>,
    /// Complexity bucket
    pub complexity: Complexity,
    /// Whether fresh external information is likely needed
    pub requires_web_search: bool,
    /// Whether the query asks for several dependent steps
    pub requires_multi_step: bool,
    /// Primary category's share of the total score
    pub confidence: Confidence,
    /// Up to five salient terms
    pub keywords: Vec<String>,
}

const MAX_SECONDARY: usize = 2;
const MAX_KEYWORDS: usize = 5;
const MIN_WORDS: usize = 3;
const CONFIDENCE_FLOOR: f64 = 0.35;
const CONFIDENCE_CEILING: f64 = 0.95;
const AMBIGUITY_RATIO: f64 = 0.7;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "been", "being", "between", "could", "does",
    "doing", "down", "each", "from", "have", "having", "into", "just", "more", "most", "much",
    "other", "over", "same", "should", "some", "such", "than", "that", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "under", "very", "want", "were", "what",
    "when", "where", "which", "while", "will", "with", "would", "your",
];

fn patterns() -> &'static [(QueryType, Regex, f64)] {
    static PATTERNS: OnceLock<Vec<(QueryType, Regex, f64)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (QueryType::Factual, r"^(what|who|when|where) (is|was|are|were)\b", 1.5),
            (QueryType::Analytical, r"\bhow (does|do|did|will|would)\b", 1.0),
            (QueryType::Comparative, r"\b\w+ (vs\.?|versus|or) \w+\b\?", 1.5),
            (QueryType::Technical, r"`[^`]+`|\b\w+\(\)|\b(fn|def|class|struct)\b", 2.0),
            (QueryType::Financial, r"\$\s?\d|\b\d+(\.\d+)?\s?%|\b[A-Z]{2,5}\b stock", 1.5),
            (QueryType::CurrentEvents, r"\b20[2-9]\d\b|\b(this|last) (week|month|quarter)\b", 1.0),
            (QueryType::Recommendation, r"\b(best|top) \d+\b|\bunder \$?\d+", 1.5),
        ]
        .into_iter()
        .filter_map(|(kind, pattern, weight)| Regex::new(pattern).ok().map(|re| (kind, re, weight)))
        .collect()
    })
}

fn web_search_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(latest|today|current|currently|recent|recently|news|now|price|prices|20[2-9]\d)\b")
            .ok()
    })
    .as_ref()
}

fn multi_step_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(step by step|and then|first\b.*\bthen|plan|pros and cons|compare|trade-?offs?)\b")
            .ok()
    })
    .as_ref()
}

/// Classify free text. Never fails; short or signal-free input yields
/// [`QueryType::General`] with low confidence.
pub fn classify(text: &str) -> QueryAnalysis {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let words: Vec<String> = normalized
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let keywords = extract_keywords(&words);

    if words.len() < MIN_WORDS {
        return QueryAnalysis {
            primary_type: QueryType::General,
            secondary_types: Vec::new(),
            complexity: Complexity::Low,
            requires_web_search: false,
            requires_multi_step: false,
            confidence: Confidence::new(0.1),
            keywords,
        };
    }

    let scores = score(text.trim(), &normalized, &words);
    let total: f64 = scores.iter().map(|(_, s)| s).sum();

    // Stable sort keeps declaration order among equal scores
    let mut ranked: Vec<(QueryType, f64)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (primary_type, best, confidence) = match ranked.first() {
        Some(&(kind, best)) => {
            let share = best / total;
            (kind, best, Confidence::new(share.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING)))
        }
        None => (QueryType::General, 0.0, Confidence::new(0.2)),
    };

    let secondary_types: Vec<QueryType> = ranked
        .iter()
        .skip(1)
        .take(MAX_SECONDARY)
        .map(|(kind, _)| *kind)
        .collect();

    let sentences = text
        .split(['.', '?', '!'])
        .filter(|s| !s.trim().is_empty())
        .count();
    let runner_up = ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);
    let signals = [
        words.len() > 25,
        sentences >= 3,
        runner_up > 0.0 && runner_up >= AMBIGUITY_RATIO * best,
        secondary_types.len() >= MAX_SECONDARY,
    ]
    .into_iter()
    .filter(|signal| *signal)
    .count();
    let complexity = Complexity::from_signals(signals);

    let requires_web_search = web_search_regex().is_some_and(|re| re.is_match(&normalized))
        || matches!(primary_type, QueryType::CurrentEvents)
        || secondary_types.contains(&QueryType::CurrentEvents);
    let requires_multi_step =
        multi_step_regex().is_some_and(|re| re.is_match(&normalized)) || complexity >= Complexity::High;

    QueryAnalysis {
        primary_type,
        secondary_types,
        complexity,
        requires_web_search,
        requires_multi_step,
        confidence,
        keywords,
    }
}

fn score(raw: &str, normalized: &str, words: &[String]) -> Vec<(QueryType, f64)> {
    let tokens: HashSet<&str> = words.iter().map(String::as_str).collect();
    QueryType::SCORED
        .iter()
        .map(|kind| {
            let keyword_score: f64 = kind
                .keywords()
                .iter()
                .filter(|(keyword, _)| {
                    if keyword.contains(' ') {
                        normalized.contains(keyword)
                    } else {
                        tokens.contains(keyword)
                    }
                })
                .map(|(_, weight)| weight)
                .sum();
            // patterns see the raw text so case-sensitive ones (tickers) still work
            let pattern_score: f64 = patterns()
                .iter()
                .filter(|(k, re, _)| k == kind && (re.is_match(raw) || re.is_match(normalized)))
                .map(|(_, _, weight)| weight)
                .sum();
            (*kind, keyword_score + pattern_score)
        })
        .collect()
}

fn extract_keywords(words: &[String]) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for word in words {
        if word.chars().count() < 4 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !keywords.contains(word) {
            keywords.push(word.clone());
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let text = "Compare the latest Rust and Go web frameworks for building APIs";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn test_recommendation_query() {
        let analysis = classify("Best 3 budget laptops for video editing under $1000");
        assert_eq!(analysis.primary_type, QueryType::Recommendation);
        assert!(analysis.secondary_types.contains(&QueryType::Financial));
        assert!(analysis.keywords.contains(&"laptops".to_string()));
        assert!(analysis.keywords.len() <= MAX_KEYWORDS);
    }

    #[test]
    fn test_short_input_defaults_to_general() {
        let analysis = classify("hi");
        assert_eq!(analysis.primary_type, QueryType::General);
        assert!(analysis.confidence.value() <= 0.1);

        let empty = classify("   ");
        assert_eq!(empty.primary_type, QueryType::General);
        assert_eq!(empty.complexity, Complexity::Low);
    }

    #[test]
    fn test_signal_free_input_is_general() {
        let analysis = classify("blue green yellow orange");
        assert_eq!(analysis.primary_type, QueryType::General);
        assert!((analysis.confidence.value() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_tie_breaks_by_declaration_order() {
        // one 2.0 keyword each for analytical ("analyze") and comparative ("compare")
        let analysis = classify("please analyze and compare these");
        assert_eq!(analysis.primary_type, QueryType::Analytical);
        assert_eq!(analysis.secondary_types[0], QueryType::Comparative);
    }

    #[test]
    fn test_complexity_grows_with_signals() {
        let simple = classify("What is a mutex in Rust programming?");
        let complex = classify(
            "Analyze why the stock market reacted to the latest earnings news. \
             Compare it with last quarter and explain the impact on my portfolio. \
             Then recommend whether I should buy or sell, step by step, considering \
             valuation, dividend history and current interest rates.",
        );
        assert!(complex.complexity > simple.complexity);
        assert!(complex.requires_multi_step);
        assert!(complex.requires_web_search);
    }

    #[test]
    fn test_confidence_in_range() {
        for text in ["why is the sky blue today", "write a poem about rust code", "stock vs bond?"] {
            let c = classify(text).confidence.value();
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn test_signal_patterns_compile() {
        assert!(web_search_regex().is_some());
        assert!(multi_step_regex().is_some());
        assert_eq!(patterns().len(), 7);
    }
}
