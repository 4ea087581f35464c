//! Heterogeneous model selection
//!
//! Assigns a (provider, model) pair to each requested role. Families are
//! scored from the query profile, tier and performance target; after a family
//! is picked its score is penalised so later roles lean towards other
//! families without being forbidden from reusing it.

use crate::agent::Role;
use crate::catalog::{self, ModelChoice, ModelSpec};
use crate::classifier::{Complexity, QueryAnalysis, QueryType};
use crate::error::{Error, Result};
use crate::types::{Confidence, PerformanceTarget, ProviderFamily, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::types::ProviderFamily::{Anthropic, DeepSeek, Google, Groq, Mistral, OpenAi, Xai};

const PRIMARY_WEIGHT: f64 = 3.0;
const SECONDARY_WEIGHT: f64 = 1.5;
const ROLE_WEIGHT: f64 = 2.0;
const MAX_ALTERNATIVES: usize = 8;

/// Families billed cheaply enough to favour on low tiers and cost targets
const CHEAP_FAMILIES: &[ProviderFamily] = &[Groq, DeepSeek, Google, Mistral];

fn query_affinity(kind: QueryType) -> &'static [(ProviderFamily, f64)] {
    match kind {
        QueryType::Factual => &[(Google, 1.0), (OpenAi, 0.8), (Anthropic, 0.6), (Xai, 0.4)],
        QueryType::Analytical => &[(Anthropic, 1.0), (OpenAi, 0.9), (DeepSeek, 0.7), (Google, 0.6)],
        QueryType::Comparative => &[(OpenAi, 1.0), (Anthropic, 0.9), (Google, 0.7), (Mistral, 0.4)],
        QueryType::Technical => &[(Anthropic, 1.0), (DeepSeek, 0.9), (OpenAi, 0.8), (Mistral, 0.5)],
        QueryType::Creative => &[(Anthropic, 1.0), (OpenAi, 0.8), (Mistral, 0.6), (Xai, 0.4)],
        QueryType::Financial => &[(OpenAi, 1.0), (Anthropic, 0.8), (Xai, 0.7), (DeepSeek, 0.6)],
        QueryType::CurrentEvents => &[(Xai, 1.0), (Google, 0.9), (OpenAi, 0.6)],
        QueryType::Recommendation => &[(Google, 1.0), (OpenAi, 0.8), (Anthropic, 0.7), (Groq, 0.4)],
        QueryType::General => &[
            (OpenAi, 0.8), (Anthropic, 0.8), (Google, 0.8), (Groq, 0.4), (Mistral, 0.4),
            (DeepSeek, 0.4), (Xai, 0.4),
        ],
    }
}

fn role_affinity(role: Role) -> &'static [(ProviderFamily, f64)] {
    match role {
        Role::Analyst => &[(Anthropic, 1.0), (OpenAi, 0.7)],
        Role::Critic => &[(Google, 1.0), (Xai, 0.7), (DeepSeek, 0.6)],
        Role::Synthesizer => &[(OpenAi, 1.0), (Anthropic, 0.8)],
        Role::Judge => &[(Anthropic, 1.0), (OpenAi, 0.9)],
        Role::Specialist(_) => &[(Groq, 0.8), (Google, 0.6), (DeepSeek, 0.6), (Mistral, 0.5)],
    }
}

fn lookup_weight(table: &[(ProviderFamily, f64)], family: ProviderFamily) -> f64 {
    table
        .iter()
        .find(|(f, _)| *f == family)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

/// Overall diversity of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixStrategy {
    /// Three or more distinct families
    Heterogeneous,
    /// Exactly two families
    Hybrid,
    /// One family
    Homogeneous,
}

impl MixStrategy {
    fn for_families(count: usize) -> Self {
        match count {
            0 | 1 => MixStrategy::Homogeneous,
            2 => MixStrategy::Hybrid,
            _ => MixStrategy::Heterogeneous,
        }
    }

    /// Expected accuracy gain over a single-model answer
    fn improvement_estimate(&self, families: usize) -> f64 {
        match self {
            MixStrategy::Heterogeneous => (0.25 + 0.02 * (families.saturating_sub(3)) as f64).min(0.35),
            MixStrategy::Hybrid => 0.12,
            MixStrategy::Homogeneous => 0.0,
        }
    }
}

/// Assignment for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecommendation {
    /// Role the model fills
    pub role: Role,
    /// Provider family
    pub provider: ProviderFamily,
    /// Model identifier
    pub model: String,
    /// Why this model was chosen
    pub reasoning: String,
    /// Margin of the winning family over the runner-up
    pub confidence: Confidence,
    /// Ranked substitutes used by availability validation
    pub alternatives: Vec<ModelChoice>,
}

impl ModelRecommendation {
    /// The (provider, model) pair
    pub fn choice(&self) -> ModelChoice {
        ModelChoice::new(self.provider, self.model.clone())
    }
}

/// Full selection output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPlan {
    /// One recommendation per requested role, in request order
    pub recommendations: Vec<ModelRecommendation>,
    /// Diversity label
    pub strategy: MixStrategy,
    /// Expected improvement from mixing, in [0,1]
    pub improvement_estimate: f64,
    /// Summary of the selection
    pub reasoning: String,
}

impl SelectionPlan {
    /// Distinct families used
    pub fn families(&self) -> BTreeSet<ProviderFamily> {
        self.recommendations.iter().map(|r| r.provider).collect()
    }

    fn summarise(recommendations: Vec<ModelRecommendation>, analysis: &QueryAnalysis) -> Self {
        let families: BTreeSet<ProviderFamily> = recommendations.iter().map(|r| r.provider).collect();
        let strategy = MixStrategy::for_families(families.len());
        let reasoning = format!(
            "{} query ({:?} complexity): {} role(s) across {} provider famil{}",
            analysis.primary_type,
            analysis.complexity,
            recommendations.len(),
            families.len(),
            if families.len() == 1 { "y" } else { "ies" }
        );
        Self {
            improvement_estimate: strategy.improvement_estimate(families.len()),
            strategy,
            recommendations,
            reasoning,
        }
    }
}

/// Heterogeneous mixer
#[derive(Debug, Clone)]
pub struct ModelSelector {
    repeat_penalty: f64,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self { repeat_penalty: 2.5 }
    }
}

impl ModelSelector {
    /// Selector with the default repeat penalty
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score subtracted from a family each time it is picked
    pub fn with_repeat_penalty(mut self, penalty: f64) -> Self {
        self.repeat_penalty = penalty.max(0.0);
        self
    }

    /// Assign one model per role.
    ///
    /// Fails with a configuration error when a role has no tier-available model
    /// in any family; nothing is called before that check.
    pub fn select(
        &self,
        analysis: &QueryAnalysis,
        roles: &[Role],
        tier: Tier,
        target: PerformanceTarget,
    ) -> Result<SelectionPlan> {
        if roles.is_empty() {
            return Err(Error::validation("at least one role is required"));
        }

        let mut scores = base_scores(analysis, tier, target);
        let mut recommendations = Vec::with_capacity(roles.len());

        for &role in roles {
            let mut ranked: Vec<(ProviderFamily, f64, &'static ModelSpec)> = ProviderFamily::ALL
                .into_iter()
                .filter_map(|family| {
                    let model = best_model(family, tier, target, role.needs_tools())?;
                    let score = scores[&family] + ROLE_WEIGHT * lookup_weight(role_affinity(role), family);
                    Some((family, score, model))
                })
                .collect();
            // Stable: equal scores keep family declaration order
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            let Some(&(family, score, model)) = ranked.first() else {
                return Err(Error::configuration(format!(
                    "no model available for role {} on tier {:?}",
                    role, tier
                )));
            };

            let runner_up = ranked.get(1).map(|r| r.1).unwrap_or(0.0);
            let margin = if score > 0.0 { (score - runner_up) / score } else { 0.0 };
            let alternatives = alternatives_for(&ranked, model, tier, role.needs_tools());

            debug!(role = %role, provider = %family, model = model.id, score, "selected model");
            recommendations.push(ModelRecommendation {
                role,
                provider: family,
                model: model.id.to_string(),
                reasoning: format!(
                    "{} scored {:.2} for {} on a {} query; {} is its best-ranked model for this tier",
                    family, score, role, analysis.primary_type, model.id
                ),
                confidence: Confidence::new(0.5 + 0.45 * margin.clamp(0.0, 1.0)),
                alternatives,
            });

            if let Some(s) = scores.get_mut(&family) {
                *s -= self.repeat_penalty;
            }
        }

        let plan = SelectionPlan::summarise(recommendations, analysis);
        info!(strategy = ?plan.strategy, families = plan.families().len(), "model selection complete");
        Ok(plan)
    }

    /// Replace any recommendation `is_available` rejects with its first
    /// available alternative.
    pub fn validate<F>(&self, plan: SelectionPlan, analysis: &QueryAnalysis, is_available: F) -> Result<SelectionPlan>
    where
        F: Fn(&ModelChoice) -> bool,
    {
        let mut recommendations = Vec::with_capacity(plan.recommendations.len());
        for mut rec in plan.recommendations {
            let current = rec.choice();
            if is_available(&current) {
                recommendations.push(rec);
                continue;
            }
            let substitute = rec
                .alternatives
                .iter()
                .find(|alt| is_available(alt))
                .cloned()
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "{} is unavailable for role {} and no alternative is available",
                        current, rec.role
                    ))
                })?;

            info!(role = %rec.role, from = %current, to = %substitute, "substituted unavailable model");
            rec.reasoning = format!("{} (substituted for unavailable {})", rec.reasoning, current);
            rec.alternatives.retain(|alt| *alt != substitute);
            rec.provider = substitute.provider;
            rec.model = substitute.model;
            recommendations.push(rec);
        }
        Ok(SelectionPlan::summarise(recommendations, analysis))
    }
}

fn base_scores(analysis: &QueryAnalysis, tier: Tier, target: PerformanceTarget) -> HashMap<ProviderFamily, f64> {
    ProviderFamily::ALL
        .into_iter()
        .map(|family| {
            let mut score = PRIMARY_WEIGHT * lookup_weight(query_affinity(analysis.primary_type), family);
            for secondary in &analysis.secondary_types {
                score += SECONDARY_WEIGHT * lookup_weight(query_affinity(*secondary), family);
            }

            let cheap = CHEAP_FAMILIES.contains(&family);
            score += match tier {
                Tier::Free if cheap => 1.5,
                Tier::Pro if matches!(family, Groq | DeepSeek) => 0.5,
                _ => 0.0,
            };
            score += match target {
                PerformanceTarget::Cost if cheap => 1.0,
                PerformanceTarget::Accuracy if matches!(family, Anthropic | OpenAi | Google) => 1.0,
                _ => 0.0,
            };
            if analysis.complexity >= Complexity::High && matches!(family, Anthropic | OpenAi) {
                score += 0.5;
            }
            if analysis.requires_web_search && matches!(family, Google | Xai) {
                score += 0.75;
            }
            (family, score)
        })
        .collect()
}

fn eligible(family: ProviderFamily, tier: Tier, needs_tools: bool) -> impl Iterator<Item = &'static ModelSpec> {
    catalog::models_for(family, tier)
        .into_iter()
        .filter(move |m| !needs_tools || m.supports_tools)
}

fn best_model(
    family: ProviderFamily,
    tier: Tier,
    target: PerformanceTarget,
    needs_tools: bool,
) -> Option<&'static ModelSpec> {
    let models = eligible(family, tier, needs_tools);
    match target {
        PerformanceTarget::Cost => models.min_by(|a, b| {
            a.blended_cost()
                .total_cmp(&b.blended_cost())
                .then(a.benchmark_rank.cmp(&b.benchmark_rank))
        }),
        // models_for is already ordered by rank, then cost
        PerformanceTarget::Balance | PerformanceTarget::Accuracy => models.into_iter().next(),
    }
}

fn alternatives_for(
    ranked: &[(ProviderFamily, f64, &'static ModelSpec)],
    chosen: &ModelSpec,
    tier: Tier,
    needs_tools: bool,
) -> Vec<ModelChoice> {
    // other families' picks in score order, then the chosen family's next models
    let mut alternatives: Vec<ModelChoice> = ranked
        .iter()
        .skip(1)
        .map(|(_, _, model)| model.choice())
        .collect();
    alternatives.extend(
        eligible(chosen.family, tier, needs_tools)
            .filter(|m| m.id != chosen.id)
            .map(ModelSpec::choice),
    );
    alternatives.truncate(MAX_ALTERNATIVES);
    alternatives
}
