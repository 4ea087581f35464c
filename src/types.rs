//! Core type definitions shared across the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::Duration;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for one configured debate participant
    AgentId
);

uuid_id!(
    /// Unique identifier for a debate session
    SessionId
);

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of prompt tokens
    pub prompt: u64,
    /// Number of completion tokens
    pub completion: u64,
    /// Total tokens (prompt + completion)
    pub total: u64,
}

impl TokenUsage {
    /// Create a new token usage record
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt: self.prompt + other.prompt,
            completion: self.completion + other.completion,
            total: self.total + other.total,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        *self = *self + other;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), |acc, t| acc + t)
    }
}

/// A confidence value in the canonical `[0, 1]` range.
///
/// Every selector, debate and aggregator confidence is carried in this type.
/// Model outputs that report percentages are converted once, at the parsing
/// boundary, through [`Confidence::from_model_value`].
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Zero confidence
    pub const ZERO: Confidence = Confidence(0.0);

    /// Create a confidence, clamping into `[0, 1]`. NaN becomes zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Interpret a value reported by a model: values above 1 are percentages.
    pub fn from_model_value(value: f64) -> Self {
        if value > 1.0 {
            Self::new(value / 100.0)
        } else {
            Self::new(value)
        }
    }

    /// The raw value
    pub fn value(self) -> f64 {
        self.0
    }

    /// Convert to a `[0, 100]` percentage for display at the outer boundary
    pub fn as_percent(self) -> f64 {
        self.0 * 100.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Model provider families. Declaration order is the selector's tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Claude models
    Anthropic,
    /// GPT and o-series models
    OpenAi,
    /// Gemini models
    Google,
    /// Hosted open-weight models on Groq
    Groq,
    /// Mistral models
    Mistral,
    /// DeepSeek models
    DeepSeek,
    /// Grok models
    Xai,
}

impl ProviderFamily {
    /// All families in declaration order
    pub const ALL: [ProviderFamily; 7] = [
        ProviderFamily::Anthropic,
        ProviderFamily::OpenAi,
        ProviderFamily::Google,
        ProviderFamily::Groq,
        ProviderFamily::Mistral,
        ProviderFamily::DeepSeek,
        ProviderFamily::Xai,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Google => "google",
            ProviderFamily::Groq => "groq",
            ProviderFamily::Mistral => "mistral",
            ProviderFamily::DeepSeek => "deepseek",
            ProviderFamily::Xai => "xai",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription tier of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Free tier: cheap and free models only
    Free,
    /// Paid per-token tier
    #[default]
    Pro,
    /// Highest per-token tier, all models
    Max,
    /// Billed through a flat subscription; fallback is disabled
    Subscription,
}

impl Tier {
    /// Subscription-billed tiers fail fast instead of falling back
    pub fn is_subscription_billed(&self) -> bool {
        matches!(self, Tier::Subscription)
    }
}

/// Optimisation target for model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTarget {
    /// Cheapest acceptable model
    Cost,
    /// Quality per dollar
    #[default]
    Balance,
    /// Best benchmark rank regardless of cost
    Accuracy,
}

/// Research timeframe granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    /// Within one trading day
    Intraday,
    /// One day
    #[default]
    Day,
    /// One week
    Week,
    /// One month
    Month,
    /// One year
    Year,
}

impl Timeframe {
    /// Cache lifetime for reports of this granularity; shorter timeframes expire sooner
    pub fn cache_ttl(&self) -> Duration {
        match self {
            Timeframe::Intraday => Duration::from_secs(5 * 60),
            Timeframe::Day => Duration::from_secs(15 * 60),
            Timeframe::Week => Duration::from_secs(60 * 60),
            Timeframe::Month => Duration::from_secs(4 * 60 * 60),
            Timeframe::Year => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Lowercase name used in prompts and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Intraday => "intraday",
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
            Timeframe::Year => "year",
        }
    }
}

/// How long agent responses should be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLength {
    /// Short answers
    Concise,
    /// Default length
    #[default]
    Normal,
    /// Long-form answers
    Detailed,
}

impl ResponseLength {
    /// Completion token ceiling for this mode
    pub fn max_tokens(&self) -> u32 {
        match self {
            ResponseLength::Concise => 400,
            ResponseLength::Normal => 900,
            ResponseLength::Detailed => 2000,
        }
    }

    /// Instruction appended to agent prompts
    pub fn instruction(&self) -> &'static str {
        match self {
            ResponseLength::Concise => "Keep your answer under 150 words.",
            ResponseLength::Normal => "Keep your answer under 400 words.",
            ResponseLength::Detailed => "Be thorough; up to 900 words is fine.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamps_and_converts() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), 0.0);
        assert!((Confidence::from_model_value(85.0).value() - 0.85).abs() < 1e-9);
        assert!((Confidence::from_model_value(0.4).value() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_token_usage_sum() {
        let total: TokenUsage = vec![TokenUsage::new(10, 5), TokenUsage::new(1, 2)]
            .into_iter()
            .sum();
        assert_eq!(total, TokenUsage::new(11, 7));
    }

    #[test]
    fn test_shorter_timeframe_shorter_ttl() {
        assert!(Timeframe::Intraday.cache_ttl() < Timeframe::Day.cache_ttl());
        assert!(Timeframe::Day.cache_ttl() < Timeframe::Week.cache_ttl());
        assert!(Timeframe::Month.cache_ttl() < Timeframe::Year.cache_ttl());
    }

    #[test]
    fn test_family_names_are_distinct_and_serialized() {
        let names: std::collections::HashSet<_> = ProviderFamily::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(names.len(), ProviderFamily::ALL.len());
        for family in ProviderFamily::ALL {
            assert_eq!(serde_json::to_value(family).unwrap(), family.as_str());
        }
    }
}
