//! Static model catalog: families, benchmark ranks, prices and tier availability

use crate::types::{ProviderFamily, Tier, TokenUsage};
use serde::{Deserialize, Serialize};
use std::fmt;

const ALL_TIERS: &[Tier] = &[Tier::Free, Tier::Pro, Tier::Max, Tier::Subscription];
const PAID: &[Tier] = &[Tier::Pro, Tier::Max, Tier::Subscription];
const PAID_API: &[Tier] = &[Tier::Pro, Tier::Max];
const MAX_ONLY: &[Tier] = &[Tier::Max, Tier::Subscription];
const OPEN_API: &[Tier] = &[Tier::Free, Tier::Pro, Tier::Max];

/// One entry in the model catalog
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    /// Model identifier as sent to the backend
    pub id: &'static str,
    /// Provider family
    pub family: ProviderFamily,
    /// Aggregate benchmark rank (1 = best)
    pub benchmark_rank: u16,
    /// USD per million prompt tokens
    pub input_cost: f64,
    /// USD per million completion tokens
    pub output_cost: f64,
    /// Whether the backend supports function calling for this model
    pub supports_tools: bool,
    /// Tiers allowed to use this model
    pub tiers: &'static [Tier],
}

impl ModelSpec {
    /// Whether this model may be used by the given tier
    pub fn available_for(&self, tier: Tier) -> bool {
        self.tiers.contains(&tier)
    }

    /// Blended cost used as a tie-breaker (USD per million tokens)
    pub fn blended_cost(&self) -> f64 {
        (self.input_cost + self.output_cost) / 2.0
    }

    /// Convert into an owned choice
    pub fn choice(&self) -> ModelChoice {
        ModelChoice::new(self.family, self.id)
    }
}

/// The full catalog.
pub const CATALOG: &[ModelSpec] = &[
    ModelSpec { id: "claude-opus-4", family: ProviderFamily::Anthropic, benchmark_rank: 1, input_cost: 15.0, output_cost: 75.0, supports_tools: true, tiers: MAX_ONLY },
    ModelSpec { id: "o3", family: ProviderFamily::OpenAi, benchmark_rank: 2, input_cost: 10.0, output_cost: 40.0, supports_tools: true, tiers: MAX_ONLY },
    ModelSpec { id: "gemini-2.5-pro", family: ProviderFamily::Google, benchmark_rank: 3, input_cost: 1.25, output_cost: 10.0, supports_tools: true, tiers: PAID_API },
    ModelSpec { id: "claude-sonnet-4", family: ProviderFamily::Anthropic, benchmark_rank: 4, input_cost: 3.0, output_cost: 15.0, supports_tools: true, tiers: PAID },
    ModelSpec { id: "grok-3", family: ProviderFamily::Xai, benchmark_rank: 5, input_cost: 3.0, output_cost: 15.0, supports_tools: true, tiers: PAID_API },
    ModelSpec { id: "deepseek-reasoner", family: ProviderFamily::DeepSeek, benchmark_rank: 6, input_cost: 0.55, output_cost: 2.19, supports_tools: false, tiers: PAID_API },
    ModelSpec { id: "gpt-4o", family: ProviderFamily::OpenAi, benchmark_rank: 7, input_cost: 2.5, output_cost: 10.0, supports_tools: true, tiers: PAID },
    ModelSpec { id: "mistral-large-latest", family: ProviderFamily::Mistral, benchmark_rank: 8, input_cost: 2.0, output_cost: 6.0, supports_tools: true, tiers: PAID_API },
    ModelSpec { id: "deepseek-chat", family: ProviderFamily::DeepSeek, benchmark_rank: 9, input_cost: 0.27, output_cost: 1.1, supports_tools: true, tiers: OPEN_API },
    ModelSpec { id: "gemini-2.0-flash", family: ProviderFamily::Google, benchmark_rank: 10, input_cost: 0.1, output_cost: 0.4, supports_tools: true, tiers: OPEN_API },
    ModelSpec { id: "claude-3-5-haiku", family: ProviderFamily::Anthropic, benchmark_rank: 11, input_cost: 0.8, output_cost: 4.0, supports_tools: true, tiers: PAID },
    ModelSpec { id: "llama-3.3-70b-versatile", family: ProviderFamily::Groq, benchmark_rank: 12, input_cost: 0.59, output_cost: 0.79, supports_tools: true, tiers: OPEN_API },
    ModelSpec { id: "grok-3-mini", family: ProviderFamily::Xai, benchmark_rank: 13, input_cost: 0.3, output_cost: 0.5, supports_tools: true, tiers: OPEN_API },
    ModelSpec { id: "gpt-4o-mini", family: ProviderFamily::OpenAi, benchmark_rank: 14, input_cost: 0.15, output_cost: 0.6, supports_tools: true, tiers: ALL_TIERS },
    ModelSpec { id: "mistral-small-latest", family: ProviderFamily::Mistral, benchmark_rank: 15, input_cost: 0.2, output_cost: 0.6, supports_tools: true, tiers: OPEN_API },
    ModelSpec { id: "llama-3.1-8b-instant", family: ProviderFamily::Groq, benchmark_rank: 16, input_cost: 0.05, output_cost: 0.08, supports_tools: false, tiers: OPEN_API },
];

/// A concrete (provider, model) assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelChoice {
    /// Provider family
    pub provider: ProviderFamily,
    /// Model identifier
    pub model: String,
}

impl ModelChoice {
    /// Create a new model choice
    pub fn new(provider: ProviderFamily, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Resolve a bare model id through the catalog
    pub fn from_catalog(model: &str) -> Option<Self> {
        lookup(model).map(ModelSpec::choice)
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Find a model by id
pub fn lookup(model: &str) -> Option<&'static ModelSpec> {
    CATALOG.iter().find(|m| m.id == model)
}

/// Models of one family usable by a tier, best first (rank, then cost)
pub fn models_for(family: ProviderFamily, tier: Tier) -> Vec<&'static ModelSpec> {
    let mut models: Vec<_> = CATALOG
        .iter()
        .filter(|m| m.family == family && m.available_for(tier))
        .collect();
    models.sort_by(|a, b| {
        a.benchmark_rank
            .cmp(&b.benchmark_rank)
            .then(a.blended_cost().total_cmp(&b.blended_cost()))
    });
    models
}

/// Cheapest model usable by a tier that also passes `usable`, optionally
/// restricted to tool-capable ones
pub fn cheapest_for<F>(tier: Tier, needs_tools: bool, usable: F) -> Option<&'static ModelSpec>
where
    F: Fn(&ModelSpec) -> bool,
{
    CATALOG
        .iter()
        .filter(|m| m.available_for(tier) && (!needs_tools || m.supports_tools))
        .filter(|m| usable(m))
        .min_by(|a, b| {
            a.blended_cost()
                .total_cmp(&b.blended_cost())
                .then(a.benchmark_rank.cmp(&b.benchmark_rank))
        })
}

/// Estimated USD cost of a call. Unknown models cost nothing.
pub fn estimate_cost(model: &str, tokens: TokenUsage) -> f64 {
    lookup(model)
        .map(|m| {
            (tokens.prompt as f64 * m.input_cost + tokens.completion as f64 * m.output_cost)
                / 1_000_000.0
        })
        .unwrap_or(0.0)
}
