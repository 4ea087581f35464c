//! Consensus aggregator
//!
//! Independent per-model verdicts are tallied over a discrete label space and
//! a judge model writes the unifying explanation. Plurality wins; on an exact
//! tie the judge's own recommendation decides.
//!
//! Confidence is `0.6 * agreement + 0.4 * judge`, where agreement is the
//! winner's share of the non-abstained votes. When the judge call fails the
//! plurality stands, confidence is `agreement - 0.15` and
//! [`ConsensusResult::judge_available`] is false.

use crate::agent::Role;
use crate::catalog::{estimate_cost, ModelChoice};
use crate::decode::{decode, Decoded};
use crate::error::{Error, Result};
use crate::gateway::ProviderGateway;
use crate::provider::QueryConfig;
use crate::types::{Confidence, ResponseLength, Tier, TokenUsage};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Weight of the vote share in the combined confidence
pub const AGREEMENT_WEIGHT: f64 = 0.6;
/// Weight of the judge's confidence in the combined confidence
pub const JUDGE_WEIGHT: f64 = 0.4;
/// Subtracted from the vote share when the judge is unavailable
pub const JUDGE_UNAVAILABLE_PENALTY: f64 = 0.15;

/// One model's independent answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Model that voted
    pub model: ModelChoice,
    /// Normalised label; `None` when the verdict abstained
    pub label: Option<String>,
    /// Self-reported confidence
    pub confidence: Confidence,
    /// Free-text reasoning
    pub reasoning: String,
    /// Token usage of the call
    #[serde(default)]
    pub tokens: TokenUsage,
    /// Why the verdict abstained, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(alias = "action", alias = "recommendation", alias = "answer", alias = "vote")]
    label: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "rationale", alias = "reason", alias = "explanation")]
    reasoning: String,
}

const LABEL_KEYS: [&str; 5] = ["label", "action", "recommendation", "answer", "vote"];
const REASONING_KEYS: [&str; 4] = ["reasoning", "rationale", "reason", "explanation"];

impl Verdict {
    /// A counted vote
    pub fn new(
        model: ModelChoice,
        label: impl Into<String>,
        confidence: Confidence,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            model,
            label: Some(normalise_label(&label.into())),
            confidence,
            reasoning: reasoning.into(),
            tokens: TokenUsage::default(),
            error: None,
        }
    }

    /// An abstention
    pub fn abstained(model: ModelChoice, reason: impl Into<String>) -> Self {
        Self {
            model,
            label: None,
            confidence: Confidence::ZERO,
            reasoning: String::new(),
            tokens: TokenUsage::default(),
            error: Some(reason.into()),
        }
    }

    /// Attach token usage
    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }

    /// Parse model output. Anything that does not yield a label in
    /// `labels` (any label when empty) becomes an abstention.
    pub fn parse(model: ModelChoice, text: &str, labels: &[String]) -> Self {
        let (label, confidence, reasoning) = match decode::<RawVerdict>(text) {
            Decoded::Complete(raw) => (raw.label, raw.confidence, raw.reasoning),
            Decoded::Partial(value) => match loose_fields(&value) {
                Some(fields) => fields,
                None => return Self::abstained(model, "verdict JSON has no label"),
            },
            Decoded::Abstain(reason) => return Self::abstained(model, reason),
        };

        let label = normalise_label(&label);
        if label.is_empty() {
            return Self::abstained(model, "empty label");
        }
        if !labels.is_empty() && !labels.iter().any(|l| normalise_label(l) == label) {
            return Self::abstained(model, format!("label {} outside the label space", label));
        }

        Self {
            model,
            label: Some(label),
            confidence: confidence
                .map(Confidence::from_model_value)
                .unwrap_or(Confidence::new(0.5)),
            reasoning,
            tokens: TokenUsage::default(),
            error: None,
        }
    }

    /// Whether the verdict is excluded from the tally
    pub fn is_abstained(&self) -> bool {
        self.label.is_none()
    }
}

fn normalise_label(label: &str) -> String {
    label.trim().trim_matches(|c: char| !c.is_alphanumeric()).to_uppercase()
}

/// Read label, confidence and reasoning from JSON of an unexpected shape
fn loose_fields(value: &Value) -> Option<(String, Option<f64>, String)> {
    let label = LABEL_KEYS
        .iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))?
        .to_string();
    let confidence = value.get("confidence").and_then(|c| match c {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    });
    let reasoning = REASONING_KEYS
        .iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    Some((label, confidence, reasoning))
}

/// How a tie was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The judge's recommendation was one of the tied labels
    Judge,
    /// Highest summed voter confidence
    Confidence,
    /// Label voted for first
    FirstSeen,
}

/// Aggregated answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// All verdicts, abstentions included
    pub verdicts: Vec<Verdict>,
    /// Vote tally over non-abstained verdicts
    pub votes: BTreeMap<String, usize>,
    /// Winning label; empty when every verdict abstained
    pub unified_answer: String,
    /// Judge explanation, or a plurality summary without a judge
    pub explanation: String,
    /// Combined confidence
    pub confidence: Confidence,
    /// Winner's share of the non-abstained votes
    pub agreement: f64,
    /// False when the judge call failed or could not be parsed
    pub judge_available: bool,
    /// The judge's own recommendation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_recommendation: Option<String>,
    /// Set when the plurality was tied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break: Option<TieBreak>,
    /// Tokens across verdict and judge calls
    pub total_tokens: TokenUsage,
    /// Estimated USD cost of the same
    pub total_cost: f64,
}

impl ConsensusResult {
    /// Number of counted votes
    pub fn counted(&self) -> usize {
        self.votes.values().sum()
    }

    /// Number of abstentions
    pub fn abstentions(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_abstained()).count()
    }
}

/// What the judge is asked to return
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct JudgeDecision {
    /// The judge's own recommended label
    #[serde(alias = "label", alias = "action")]
    pub recommendation: String,
    /// Judge confidence in `[0,1]`
    #[serde(default)]
    pub confidence: Option<f64>,
    /// One explanation unifying the panel's reasoning
    #[serde(default, alias = "reasoning")]
    pub explanation: String,
}

/// Inputs shared by verdict collection and judging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRequest {
    /// Original question
    pub query: String,
    /// Allowed labels; empty means free-form labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Length mode for verdict and judge calls
    #[serde(default)]
    pub length: ResponseLength,
    /// Judge model
    pub judge: ModelChoice,
    /// Caller tier
    pub tier: Tier,
}

impl ConsensusRequest {
    /// Request with free-form labels
    pub fn new(query: impl Into<String>, judge: ModelChoice, tier: Tier) -> Self {
        Self {
            query: query.into(),
            labels: Vec::new(),
            length: ResponseLength::default(),
            judge,
            tier,
        }
    }

    /// Restrict the label space
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(|l| normalise_label(&l.into())).collect();
        self
    }

    /// Set the response length
    pub fn with_length(mut self, length: ResponseLength) -> Self {
        self.length = length;
        self
    }
}

/// Collects verdicts from a panel and resolves them
#[derive(Debug, Clone)]
pub struct ConsensusAggregator {
    gateway: ProviderGateway,
}

impl ConsensusAggregator {
    /// Create an aggregator calling through `gateway`
    pub fn new(gateway: ProviderGateway) -> Self {
        Self { gateway }
    }

    /// Collect verdicts from `panel` and aggregate them
    pub async fn run(&self, request: &ConsensusRequest, panel: &[ModelChoice]) -> Result<ConsensusResult> {
        if request.query.trim().is_empty() {
            return Err(Error::validation("consensus query is empty"));
        }
        if panel.is_empty() {
            return Err(Error::validation("consensus panel is empty"));
        }
        let verdicts = self.collect(request, panel).await;
        Ok(self.aggregate(request, verdicts).await)
    }

    /// Ask every panel model for a verdict concurrently.
    ///
    /// Output order follows `panel`. Failed calls become abstentions.
    pub async fn collect(&self, request: &ConsensusRequest, panel: &[ModelChoice]) -> Vec<Verdict> {
        let prompt = verdict_prompt(request);
        let futures = panel.iter().map(|choice| {
            let config = QueryConfig::new(choice)
                .with_temperature(Role::Analyst.default_temperature())
                .with_max_tokens(request.length.max_tokens())
                .with_system(Role::Analyst.persona());
            let prompt = prompt.as_str();
            async move {
                match self.gateway.query(prompt, &config, request.tier).await {
                    Ok(reply) => {
                        // attribute the vote to the model that answered
                        Verdict::parse(reply.used, &reply.response.text, &request.labels)
                            .with_tokens(reply.response.tokens)
                    }
                    Err(e) => {
                        warn!(model = %choice, error = %e, "verdict call failed");
                        Verdict::abstained(choice.clone(), e.to_string())
                    }
                }
            }
        });
        join_all(futures).await
    }

    /// Tally `verdicts`, consult the judge and combine. Never fails.
    pub async fn aggregate(&self, request: &ConsensusRequest, verdicts: Vec<Verdict>) -> ConsensusResult {
        let votes = tally(&verdicts);
        let counted: usize = votes.values().sum();
        let mut total_tokens: TokenUsage = verdicts.iter().map(|v| v.tokens).sum();
        let mut total_cost: f64 = verdicts
            .iter()
            .map(|v| estimate_cost(&v.model.model, v.tokens))
            .sum();

        if counted == 0 {
            warn!(verdicts = verdicts.len(), "every verdict abstained");
            return ConsensusResult {
                verdicts,
                votes,
                unified_answer: String::new(),
                explanation: "Every verdict abstained; no consensus is possible.".to_string(),
                confidence: Confidence::ZERO,
                agreement: 0.0,
                judge_available: false,
                judge_recommendation: None,
                tie_break: None,
                total_tokens,
                total_cost,
            };
        }

        let leaders = leading_labels(&votes);
        let judge = self.consult_judge(request, &verdicts, &votes, &leaders).await;
        if let Some((_, tokens)) = &judge {
            total_tokens += *tokens;
            total_cost += estimate_cost(&request.judge.model, *tokens);
        }
        let decision = judge.and_then(|(decision, _)| decision);

        let (winner, tie_break) = match leaders.as_slice() {
            [only] => (only.clone(), None),
            _ => {
                let judged = decision
                    .as_ref()
                    .map(|d| normalise_label(&d.recommendation))
                    .filter(|rec| leaders.contains(rec));
                match judged {
                    Some(rec) => (rec, Some(TieBreak::Judge)),
                    None => break_tie_without_judge(&leaders, &verdicts),
                }
            }
        };

        let winner_votes = votes.get(&winner).copied().unwrap_or(0);
        let agreement = winner_votes as f64 / counted as f64;

        let (confidence, explanation, judge_recommendation) = match decision {
            Some(decision) => {
                let judge_confidence = decision
                    .confidence
                    .map(Confidence::from_model_value)
                    .unwrap_or(Confidence::new(agreement));
                let combined = AGREEMENT_WEIGHT * agreement + JUDGE_WEIGHT * judge_confidence.value();
                let explanation = if decision.explanation.trim().is_empty() {
                    plurality_summary(&winner, &votes, counted)
                } else {
                    decision.explanation.trim().to_string()
                };
                (
                    Confidence::new(combined),
                    explanation,
                    Some(normalise_label(&decision.recommendation)),
                )
            }
            None => {
                warn!(winner = %winner, agreement, "judge unavailable; using plurality");
                (
                    Confidence::new(agreement - JUDGE_UNAVAILABLE_PENALTY),
                    format!(
                        "{} Judge unavailable; confidence reduced.",
                        plurality_summary(&winner, &votes, counted)
                    ),
                    None,
                )
            }
        };

        info!(
            answer = %winner,
            counted,
            abstained = verdicts.len() - counted,
            confidence = confidence.value(),
            tie_break = ?tie_break,
            "consensus reached"
        );

        ConsensusResult {
            judge_available: judge_recommendation.is_some(),
            verdicts,
            votes,
            unified_answer: winner,
            explanation,
            confidence,
            agreement,
            judge_recommendation,
            tie_break,
            total_tokens,
            total_cost,
        }
    }

    /// Judge decision (if parsable) plus token usage, or `None` if the call failed
    async fn consult_judge(
        &self,
        request: &ConsensusRequest,
        verdicts: &[Verdict],
        votes: &BTreeMap<String, usize>,
        leaders: &[String],
    ) -> Option<(Option<JudgeDecision>, TokenUsage)> {
        let prompt = judge_prompt(request, verdicts, votes, leaders);
        let config = QueryConfig::new(&request.judge)
            .with_temperature(Role::Judge.default_temperature())
            .with_max_tokens(request.length.max_tokens())
            .with_system(Role::Judge.persona());

        let reply = match self.gateway.query(&prompt, &config, request.tier).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(judge = %request.judge, error = %e, "judge call failed");
                return None;
            }
        };
        let tokens = reply.response.tokens;
        match decode::<JudgeDecision>(&reply.response.text) {
            Decoded::Complete(decision) if !normalise_label(&decision.recommendation).is_empty() => {
                debug!(judge = %reply.used, recommendation = %decision.recommendation, "judge decided");
                Some((Some(decision), tokens))
            }
            _ => {
                warn!(judge = %reply.used, "judge output could not be parsed");
                Some((None, tokens))
            }
        }
    }
}

/// Count non-abstained verdicts per label
pub fn tally(verdicts: &[Verdict]) -> BTreeMap<String, usize> {
    let mut votes = BTreeMap::new();
    for label in verdicts.iter().filter_map(|v| v.label.as_ref()) {
        *votes.entry(label.clone()).or_insert(0) += 1;
    }
    votes
}

fn leading_labels(votes: &BTreeMap<String, usize>) -> Vec<String> {
    let top = votes.values().copied().max().unwrap_or(0);
    votes
        .iter()
        .filter(|(_, count)| **count == top)
        .map(|(label, _)| label.clone())
        .collect()
}

/// Summed confidence, then the label voted for first
fn break_tie_without_judge(leaders: &[String], verdicts: &[Verdict]) -> (String, Option<TieBreak>) {
    let summed = |label: &String| -> f64 {
        verdicts
            .iter()
            .filter(|v| v.label.as_ref() == Some(label))
            .map(|v| v.confidence.value())
            .sum()
    };
    let best = leaders.iter().map(summed).fold(f64::MIN, f64::max);
    let strongest: Vec<&String> = leaders
        .iter()
        .filter(|l| (summed(*l) - best).abs() < 1e-9)
        .collect();

    if let [only] = strongest.as_slice() {
        return ((*only).clone(), Some(TieBreak::Confidence));
    }
    let first = verdicts
        .iter()
        .filter_map(|v| v.label.as_ref())
        .find(|label| strongest.contains(label))
        .or_else(|| leaders.first())
        .cloned()
        .unwrap_or_default();
    (first, Some(TieBreak::FirstSeen))
}

fn plurality_summary(winner: &str, votes: &BTreeMap<String, usize>, counted: usize) -> String {
    let breakdown = votes
        .iter()
        .map(|(label, count)| format!("{} {}", label, count))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} won {} of {} counted votes ({}).",
        winner,
        votes.get(winner).copied().unwrap_or(0),
        counted,
        breakdown
    )
}

fn label_clause(labels: &[String]) -> String {
    if labels.is_empty() {
        "a short label naming your answer".to_string()
    } else {
        format!("exactly one of: {}", labels.join(", "))
    }
}

fn verdict_prompt(request: &ConsensusRequest) -> String {
    format!(
        "Question: {query}\n\n\
         Decide independently. {length}\n\
         Reply with JSON only: {{\"label\": {labels}, \"confidence\": a number between 0 and 1, \
         \"reasoning\": \"why\"}}",
        query = request.query,
        length = request.length.instruction(),
        labels = label_clause(&request.labels),
    )
}

fn judge_schema() -> String {
    let schema = schemars::schema_for!(JudgeDecision);
    serde_json::to_string(&schema).unwrap_or_else(|_| "{}".to_string())
}

fn judge_prompt(
    request: &ConsensusRequest,
    verdicts: &[Verdict],
    votes: &BTreeMap<String, usize>,
    leaders: &[String],
) -> String {
    let panel = verdicts
        .iter()
        .filter_map(|v| {
            v.label.as_ref().map(|label| {
                format!(
                    "- {} voted {} (confidence {}): {}",
                    v.model,
                    label,
                    v.confidence,
                    v.reasoning.trim()
                )
            })
        })
        .collect::<Vec<_>>()
        .join("\n");
    let tally = votes
        .iter()
        .map(|(label, count)| format!("{}: {}", label, count))
        .collect::<Vec<_>>()
        .join(", ");
    let tie = if leaders.len() > 1 {
        format!(
            "The vote is currently TIED between {}. Your recommendation will break the tie, \
             so it must be one of those labels.",
            leaders.join(" and ")
        )
    } else {
        "There is no tie; the plurality label stands regardless of your recommendation.".to_string()
    };

    format!(
        "Question: {query}\n\n\
         Panel verdicts:\n{panel}\n\n\
         Vote tally: {tally}\n\n\
         Rule: the plurality label wins. On an exact tie, your own independent \
         recommendation breaks the tie.\n{tie}\n\n\
         Give your own recommendation ({labels}), your confidence between 0 and 1, and one \
         explanation that unifies the panel's reasoning. {length}\n\
         Reply with JSON only, matching this schema:\n{schema}",
        query = request.query,
        labels = label_clause(&request.labels),
        length = request.length.instruction(),
        schema = judge_schema(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FallbackMemory;
    use crate::provider::{ModelProvider, ModelResponse};
    use crate::types::ProviderFamily;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Judge backend returning a fixed reply, or failing when `reply` is `None`
    struct JudgeProvider {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelProvider for JudgeProvider {
        async fn query(&self, prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
            self.prompts.lock().push(prompt.to_string());
            match &self.reply {
                Some(text) => Ok(ModelResponse::text(text.clone(), TokenUsage::new(100, 50))),
                None => Err(Error::provider("anthropic", &config.model, "judge offline")),
            }
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn family(&self) -> ProviderFamily {
            ProviderFamily::Anthropic
        }

        fn client_type(&self) -> &str {
            "mock"
        }
    }

    fn aggregator(reply: Option<&str>) -> (ConsensusAggregator, Arc<JudgeProvider>) {
        let provider = Arc::new(JudgeProvider {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        });
        // only the judge's family is registered so a failing judge has nowhere to fall back
        let gateway = ProviderGateway::new(Arc::new(FallbackMemory::default()))
            .with_provider(provider.clone());
        (ConsensusAggregator::new(gateway), provider)
    }

    fn request() -> ConsensusRequest {
        ConsensusRequest::new(
            "Should ACME be bought?",
            ModelChoice::new(ProviderFamily::Anthropic, "claude-sonnet-4"),
            Tier::Pro,
        )
        .with_labels(["BUY", "HOLD", "SELL"])
    }

    fn vote(label: &str, confidence: f64) -> Verdict {
        Verdict::new(
            ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o"),
            label,
            Confidence::new(confidence),
            "because",
        )
    }

    #[test]
    fn test_verdict_parsing_tolerance() {
        let model = ModelChoice::new(ProviderFamily::Groq, "llama-3.3-70b-versatile");
        let labels = vec!["BUY".to_string(), "HOLD".to_string()];

        let fenced = "My take:\n```json\n{\"action\": \"buy\", \"confidence\": 80, \"reasoning\": \"growth\",}\n```";
        let verdict = Verdict::parse(model.clone(), fenced, &labels);
        assert_eq!(verdict.label.as_deref(), Some("BUY"));
        assert_eq!(verdict.confidence, Confidence::new(0.8));

        let loose = r#"{"recommendation": "HOLD", "confidence": "70%"}"#;
        let verdict = Verdict::parse(model.clone(), loose, &labels);
        assert_eq!(verdict.label.as_deref(), Some("HOLD"));
        assert_eq!(verdict.confidence, Confidence::new(0.7));

        assert!(Verdict::parse(model.clone(), "I'd buy it.", &labels).is_abstained());
        assert!(Verdict::parse(model, r#"{"label": "SELL"}"#, &labels).is_abstained());
    }

    #[tokio::test]
    async fn test_judge_unavailable_penalty() {
        let (aggregator, _) = aggregator(None);
        let verdicts = vec![
            vote("BUY", 0.8),
            vote("BUY", 0.7),
            vote("HOLD", 0.6),
            vote("BUY", 0.9),
            vote("HOLD", 0.5),
        ];

        let result = aggregator.aggregate(&request(), verdicts).await;

        assert_eq!(result.votes.get("BUY"), Some(&3));
        assert_eq!(result.votes.get("HOLD"), Some(&2));
        assert_eq!(result.unified_answer, "BUY");
        assert!(!result.judge_available);
        assert!((result.confidence.value() - (0.6 - JUDGE_UNAVAILABLE_PENALTY)).abs() < 1e-9);
        assert!(result.explanation.contains("Judge unavailable"));
    }

    #[tokio::test]
    async fn test_judge_breaks_tie_and_prompt_says_so() {
        let (aggregator, provider) = aggregator(Some(
            r#"{"recommendation": "HOLD", "confidence": 0.9, "explanation": "Valuation is stretched."}"#,
        ));
        let verdicts = vec![vote("BUY", 0.9), vote("HOLD", 0.4)];

        let result = aggregator.aggregate(&request(), verdicts).await;

        assert_eq!(result.unified_answer, "HOLD");
        assert_eq!(result.tie_break, Some(TieBreak::Judge));
        assert!(result.judge_available);
        // 0.6 * 0.5 + 0.4 * 0.9
        assert!((result.confidence.value() - 0.66).abs() < 1e-9);
        assert_eq!(result.explanation, "Valuation is stretched.");

        let prompts = provider.prompts.lock();
        assert!(prompts[0].contains("On an exact tie, your own independent recommendation breaks the tie"));
        assert!(prompts[0].contains("TIED between BUY and HOLD"));
    }

    #[tokio::test]
    async fn test_tie_without_judge_uses_confidence() {
        let (aggregator, _) = aggregator(Some("no idea"));
        let verdicts = vec![vote("BUY", 0.4), vote("HOLD", 0.9)];

        let result = aggregator.aggregate(&request(), verdicts).await;

        assert_eq!(result.unified_answer, "HOLD");
        assert_eq!(result.tie_break, Some(TieBreak::Confidence));
        assert!(!result.judge_available);
        // judge tokens still count
        assert_eq!(result.total_tokens.total, 150);
    }

    #[tokio::test]
    async fn test_tie_falls_back_to_first_seen() {
        let (aggregator, _) = aggregator(None);
        let verdicts = vec![vote("SELL", 0.5), vote("BUY", 0.5)];
        let result = aggregator.aggregate(&request(), verdicts).await;
        assert_eq!(result.unified_answer, "SELL");
        assert_eq!(result.tie_break, Some(TieBreak::FirstSeen));
    }

    #[tokio::test]
    async fn test_abstentions_are_excluded() {
        let (aggregator, _) = aggregator(None);
        let model = ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o");
        let verdicts = vec![
            vote("BUY", 0.5),
            Verdict::abstained(model.clone(), "timeout"),
            Verdict::parse(model, "garbage", &[]),
        ];
        let result = aggregator.aggregate(&request(), verdicts).await;
        assert_eq!(result.counted(), 1);
        assert_eq!(result.abstentions(), 2);
        assert_eq!(result.verdicts.len(), 3);
    }

    #[tokio::test]
    async fn test_all_abstained_skips_judge() {
        let (aggregator, provider) = aggregator(Some(r#"{"recommendation": "BUY"}"#));
        let model = ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o");
        let result = aggregator
            .aggregate(&request(), vec![Verdict::abstained(model, "timeout")])
            .await;
        assert!(result.unified_answer.is_empty());
        assert_eq!(result.confidence, Confidence::ZERO);
        assert!(provider.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_validates_panel() {
        let (aggregator, provider) = aggregator(None);
        let err = aggregator.run(&request(), &[]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(provider.prompts.lock().is_empty());
    }
}
