//! Multi-round debate engine
//!
//! All enabled agents answer in parallel each round. Round r+1 starts only
//! once round r has fully settled, and every agent sees the complete round-r
//! transcript so it can critique and revise. After the last round a
//! synthesizer decomposes the debate into agreements, disagreements and one
//! conclusion.
//!
//! The whole session races a single wall-clock budget and an optional
//! [`CancellationToken`]. Calls still in flight when either fires keep running
//! in the background but their results are discarded.

use super::config::DisagreementKind;
use super::consensus::{ConsensusAggregator, ConsensusRequest, Verdict};
use super::disagreement::{DisagreementStrategy, LexicalDivergence, StanceVariance};
use super::session::{
    AgentResponse, Comparison, DebateRound, DebateSession, SessionError, Synthesis,
};
use crate::agent::{AgentSpec, Role};
use crate::catalog::ModelChoice;
use crate::decode::{decode, Decoded};
use crate::error::{Error, Result};
use crate::events::{Emitter, EventKind};
use crate::gateway::ProviderGateway;
use crate::provider::QueryConfig;
use crate::types::{Confidence, ResponseLength, Tier, TokenUsage};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on configured rounds
pub const MAX_ROUNDS: u32 = 5;
/// Rounds when none are configured
pub const DEFAULT_ROUNDS: u32 = 2;
/// Session budget when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Scale applied to `1 - disagreement` when the synthesizer gives no confidence
const TRANSCRIPT_CONFIDENCE_SCALE: f64 = 0.8;

/// Consensus side computation over final-round stances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOptions {
    /// Stance labels agents are asked to state
    #[serde(default)]
    pub labels: Vec<String>,
    /// Judge model; defaults to the synthesizer
    #[serde(default)]
    pub judge: Option<ModelChoice>,
}

/// Everything one debate needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Participants; disabled agents are skipped
    pub agents: Vec<AgentSpec>,
    /// Configured rounds, `1..=MAX_ROUNDS`
    pub rounds: u32,
    /// Response length mode
    pub response_length: ResponseLength,
    /// Force a second round when round 1 disagreement exceeds this
    /// (only when one round is configured)
    pub auto_extra_round: Option<f64>,
    /// End remaining rounds once disagreement falls below this
    pub early_stop_below: Option<f64>,
    /// Overrides the engine's disagreement strategy
    pub disagreement: Option<DisagreementKind>,
    /// Synthesizer model
    pub synthesizer: Option<ModelChoice>,
    /// Baseline model answered alongside round 1
    pub comparison: Option<ModelChoice>,
    /// Consensus over final-round stances
    pub consensus: Option<ConsensusOptions>,
    /// Material injected into every round-1 prompt
    pub search_context: Option<String>,
    /// Caller tier
    pub tier: Tier,
    /// Session wall clock
    pub timeout: Duration,
}

impl DebateConfig {
    /// Configuration with defaults for the given roster
    pub fn new(agents: Vec<AgentSpec>) -> Self {
        Self {
            agents,
            rounds: DEFAULT_ROUNDS,
            response_length: ResponseLength::default(),
            auto_extra_round: None,
            early_stop_below: None,
            disagreement: None,
            synthesizer: None,
            comparison: None,
            consensus: None,
            search_context: None,
            tier: Tier::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the round count
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Set the response length
    pub fn with_response_length(mut self, length: ResponseLength) -> Self {
        self.response_length = length;
        self
    }

    /// Enable the auto extra round
    pub fn with_auto_extra_round(mut self, threshold: f64) -> Self {
        self.auto_extra_round = Some(threshold);
        self
    }

    /// Enable early stop
    pub fn with_early_stop(mut self, threshold: f64) -> Self {
        self.early_stop_below = Some(threshold);
        self
    }

    /// Choose the disagreement heuristic
    pub fn with_disagreement(mut self, kind: DisagreementKind) -> Self {
        self.disagreement = Some(kind);
        self
    }

    /// Set the synthesizer model
    pub fn with_synthesizer(mut self, choice: ModelChoice) -> Self {
        self.synthesizer = Some(choice);
        self
    }

    /// Answer with a single baseline model alongside round 1
    pub fn with_comparison(mut self, choice: ModelChoice) -> Self {
        self.comparison = Some(choice);
        self
    }

    /// Aggregate final-round stances
    pub fn with_consensus(mut self, options: ConsensusOptions) -> Self {
        self.consensus = Some(options);
        self
    }

    /// Inject background material into round 1
    pub fn with_search_context(mut self, context: impl Into<String>) -> Self {
        self.search_context = Some(context.into());
        self
    }

    /// Set the tier
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the session budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Agents that take part
    pub fn enabled_agents(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.iter().filter(|a| a.enabled)
    }

    /// Reject malformed configurations
    pub fn validate(&self) -> Result<()> {
        let enabled = self.enabled_agents().count();
        if enabled < 2 {
            return Err(Error::validation(format!(
                "a debate needs at least 2 enabled agents, got {}",
                enabled
            )));
        }
        if !(1..=MAX_ROUNDS).contains(&self.rounds) {
            return Err(Error::validation(format!(
                "rounds must be within 1..={}, got {}",
                MAX_ROUNDS, self.rounds
            )));
        }
        for (name, threshold) in [
            ("auto_extra_round", self.auto_extra_round),
            ("early_stop_below", self.early_stop_below),
        ] {
            if let Some(t) = threshold {
                if !(0.0..=1.0).contains(&t) {
                    return Err(Error::validation(format!("{} must be within [0, 1], got {}", name, t)));
                }
            }
        }
        if self.timeout.is_zero() {
            return Err(Error::validation("debate timeout must be positive"));
        }
        Ok(())
    }

    /// Model that writes the synthesis
    pub fn synthesizer_choice(&self) -> Option<ModelChoice> {
        self.synthesizer.clone().or_else(|| {
            self.enabled_agents()
                .find(|a| a.role == Role::Synthesizer)
                .or_else(|| self.enabled_agents().next())
                .map(AgentSpec::choice)
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawSynthesis {
    #[serde(default)]
    agreements: Vec<String>,
    #[serde(default)]
    disagreements: Vec<String>,
    conclusion: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "follow_ups", alias = "followUpQuestions")]
    follow_up_questions: Vec<String>,
}

/// Runs debates
#[derive(Clone)]
pub struct DebateEngine {
    gateway: ProviderGateway,
    strategy: Arc<dyn DisagreementStrategy>,
    aggregator: ConsensusAggregator,
}

impl DebateEngine {
    /// Engine scoring rounds with [`LexicalDivergence`]
    pub fn new(gateway: ProviderGateway) -> Self {
        Self {
            aggregator: ConsensusAggregator::new(gateway.clone()),
            gateway,
            strategy: Arc::new(LexicalDivergence),
        }
    }

    /// Replace the default disagreement strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn DisagreementStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Run one debate to a terminal state.
    ///
    /// Only validation errors are returned as `Err`, before any model call.
    /// Timeouts, cancellation and failed rounds yield a session in the
    /// `error` state carrying whatever rounds settled.
    pub async fn run(
        &self,
        query: &str,
        config: DebateConfig,
        emitter: &Emitter,
        cancel: CancellationToken,
    ) -> Result<DebateSession> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::validation("debate query must not be empty"));
        }
        config.validate()?;

        let strategy = config
            .disagreement
            .as_ref()
            .map(DisagreementKind::build)
            .unwrap_or_else(|| self.strategy.clone());

        let mut session = DebateSession::new(query, serde_json::to_value(&config)?);
        session.start();
        let session_id = session.id;
        info!(
            %session_id,
            agents = config.enabled_agents().count(),
            rounds = config.rounds,
            strategy = strategy.name(),
            "debate started"
        );

        let shared = Mutex::new(session);
        let work = self.debate(query, &config, strategy.as_ref(), &shared, emitter);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled("debate aborted by caller".to_string())),
            result = tokio::time::timeout(config.timeout, work) => result.unwrap_or_else(|_| {
                Err(Error::Timeout(format!("debate exceeded {}s", config.timeout.as_secs_f64())))
            }),
        };
        let mut session = shared.into_inner();

        match outcome {
            Ok(()) => {
                session.complete();
                info!(
                    %session_id,
                    rounds = session.round_count(),
                    tokens = session.total_tokens.total,
                    cost = session.total_cost,
                    "debate completed"
                );
                emitter.emit(EventKind::DebateCompleted {
                    session_id,
                    rounds: session.round_count(),
                });
            }
            Err(e) => {
                warn!(%session_id, rounds = session.round_count(), error = %e, "debate failed");
                session.fail(SessionError::from(&e));
                emitter.emit(EventKind::Error {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
        Ok(session)
    }

    async fn debate(
        &self,
        query: &str,
        config: &DebateConfig,
        strategy: &dyn DisagreementStrategy,
        session: &Mutex<DebateSession>,
        emitter: &Emitter,
    ) -> Result<()> {
        let agents: Vec<AgentSpec> = config.enabled_agents().cloned().collect();
        let mut baseline = config
            .comparison
            .clone()
            .map(|choice| self.spawn_baseline(query, choice, config));

        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut planned = config.rounds;
        let mut round_number = 1;

        while round_number <= planned {
            let round = self
                .run_round(round_number, query, &agents, rounds.last(), config, strategy, emitter)
                .await;
            let disagreement = round.disagreement.unwrap_or(0.0);
            let all_failed = round.successful().next().is_none();
            session.lock().push_round(round.clone());
            rounds.push(round);

            if all_failed {
                return Err(Error::provider(
                    "all",
                    "all",
                    format!("every agent failed in round {}", round_number),
                ));
            }

            if let Some(handle) = baseline.take() {
                let comparison = handle.await.map_err(|e| {
                    Error::provider("baseline", "baseline", format!("baseline task failed: {}", e))
                });
                match comparison {
                    Ok(comparison) => session.lock().comparison = Some(comparison),
                    Err(e) => warn!(error = %e, "baseline comparison lost"),
                }
            }

            if round_number == 1 && planned == 1 {
                if let Some(threshold) = config.auto_extra_round {
                    if disagreement > threshold {
                        info!(disagreement, threshold, "disagreement high; adding a second round");
                        planned = 2;
                    }
                }
            } else if let Some(floor) = config.early_stop_below {
                if round_number < planned && disagreement < floor {
                    info!(
                        disagreement,
                        floor,
                        skipped = planned - round_number,
                        "agents converged; stopping early"
                    );
                    break;
                }
            }
            round_number += 1;
        }

        emitter.emit(EventKind::SynthesisStarted);
        let synthesis = self.synthesize(query, config, &rounds).await;
        emitter.emit(EventKind::SynthesisCompleted {
            confidence: synthesis.confidence,
        });
        session.lock().synthesis = Some(synthesis);

        if let Some(options) = &config.consensus {
            if let Some(last) = rounds.last() {
                let consensus = self.final_consensus(query, config, options, last).await;
                session.lock().consensus = Some(consensus);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        round_number: u32,
        query: &str,
        agents: &[AgentSpec],
        previous: Option<&DebateRound>,
        config: &DebateConfig,
        strategy: &dyn DisagreementStrategy,
        emitter: &Emitter,
    ) -> DebateRound {
        emitter.emit(EventKind::RoundStarted {
            round: round_number,
            agents: agents.len(),
        });
        debug!(round = round_number, agents = agents.len(), "round started");

        let mut pending: FuturesUnordered<_> = agents
            .iter()
            .enumerate()
            .map(|(index, agent)| {
                let prompt = round_prompt(query, round_number, agent, previous, config);
                let call = agent.query_config(config.response_length);
                let gateway = self.gateway.clone();
                let owned = agent.clone();
                let tier = config.tier;
                let handle = tokio::spawn(async move { ask_agent(gateway, owned, prompt, call, tier).await });
                async move { (index, handle.await) }
            })
            .collect();

        // events in completion order, responses in submission order
        let mut slots: Vec<Option<AgentResponse>> = agents.iter().map(|_| None).collect();
        while let Some((index, joined)) = pending.next().await {
            let response = joined
                .unwrap_or_else(|e| failed_response(&agents[index], format!("agent task failed: {}", e), 0));
            emitter.emit(EventKind::ModelCompleted {
                round: round_number,
                agent: response.role.to_string(),
                model: response.model.clone(),
                provider: response.provider,
                tokens: response.tokens,
                duration_ms: response.duration_ms,
                error: response.error.clone(),
            });
            slots[index] = Some(response);
        }
        let responses: Vec<AgentResponse> = slots.into_iter().flatten().collect();

        let texts: Vec<&str> = responses
            .iter()
            .filter(|r| r.is_ok())
            .map(|r| r.text.as_str())
            .collect();
        let disagreement = strategy.score(&texts);
        emitter.emit(EventKind::RoundCompleted {
            round: round_number,
            disagreement,
        });
        info!(
            round = round_number,
            succeeded = texts.len(),
            failed = responses.len() - texts.len(),
            disagreement,
            "round settled"
        );

        DebateRound {
            round_number,
            responses,
            disagreement: Some(disagreement),
        }
    }

    fn spawn_baseline(&self, query: &str, choice: ModelChoice, config: &DebateConfig) -> JoinHandle<Comparison> {
        let gateway = self.gateway.clone();
        let call = QueryConfig::new(&choice).with_max_tokens(config.response_length.max_tokens());
        let prompt = format!("{}\n\n{}", query, config.response_length.instruction());
        let tier = config.tier;
        tokio::spawn(async move {
            match gateway.query(&prompt, &call, tier).await {
                Ok(reply) => Comparison {
                    model: reply.used,
                    text: reply.response.text,
                    tokens: reply.response.tokens,
                    error: None,
                },
                Err(e) => Comparison {
                    model: choice,
                    text: String::new(),
                    tokens: TokenUsage::default(),
                    error: Some(e.to_string()),
                },
            }
        })
    }

    async fn synthesize(&self, query: &str, config: &DebateConfig, rounds: &[DebateRound]) -> Synthesis {
        let last = rounds.last();
        let fallback_confidence = Confidence::new(
            (1.0 - last.and_then(|r| r.disagreement).unwrap_or(0.0)) * TRANSCRIPT_CONFIDENCE_SCALE,
        );

        let Some(choice) = config.synthesizer_choice() else {
            return transcript_synthesis(last, fallback_confidence);
        };
        let call = QueryConfig::new(&choice)
            .with_temperature(Role::Synthesizer.default_temperature())
            .with_max_tokens(config.response_length.max_tokens())
            .with_system(Role::Synthesizer.persona());
        let prompt = synthesis_prompt(query, rounds, config.response_length);

        let reply = match self.gateway.query(&prompt, &call, config.tier).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(synthesizer = %choice, error = %e, "synthesis failed; summarising the transcript");
                return transcript_synthesis(last, fallback_confidence);
            }
        };

        match decode::<RawSynthesis>(&reply.response.text) {
            Decoded::Complete(raw) if !raw.conclusion.trim().is_empty() => Synthesis {
                agreements: raw.agreements,
                disagreements: raw.disagreements,
                conclusion: raw.conclusion.trim().to_string(),
                confidence: raw
                    .confidence
                    .map(Confidence::from_model_value)
                    .unwrap_or(fallback_confidence),
                follow_up_questions: raw.follow_up_questions,
                tokens: reply.response.tokens,
                model: Some(reply.used),
                degraded: false,
            },
            _ => {
                debug!(synthesizer = %reply.used, "synthesis was not structured; using the text");
                let text = reply.response.text.trim().to_string();
                let mut synthesis = transcript_synthesis(last, fallback_confidence);
                if !text.is_empty() {
                    synthesis.conclusion = text;
                    synthesis.degraded = false;
                }
                synthesis.tokens = reply.response.tokens;
                synthesis.model = Some(reply.used);
                synthesis
            }
        }
    }

    async fn final_consensus(
        &self,
        query: &str,
        config: &DebateConfig,
        options: &ConsensusOptions,
        last: &DebateRound,
    ) -> super::consensus::ConsensusResult {
        let stances = StanceVariance::new(options.labels.clone());
        let verdicts: Vec<Verdict> = last
            .successful()
            .map(|response| {
                let model = ModelChoice::new(response.provider, response.model.clone());
                let verdict = Verdict::parse(model.clone(), &response.text, &options.labels);
                match (verdict.is_abstained(), stances.stance(&response.text)) {
                    (true, Some(label)) => Verdict::new(model, label, Confidence::new(0.5), excerpt(&response.text)),
                    _ => verdict,
                }
            })
            .collect();

        let judge = options
            .judge
            .clone()
            .or_else(|| config.synthesizer_choice())
            .unwrap_or_else(|| ModelChoice::new(last.responses[0].provider, last.responses[0].model.clone()));
        let request = ConsensusRequest::new(query, judge, config.tier)
            .with_labels(options.labels.clone())
            .with_length(config.response_length);
        self.aggregator.aggregate(&request, verdicts).await
    }
}

impl std::fmt::Debug for DebateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateEngine")
            .field("gateway", &self.gateway)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

async fn ask_agent(
    gateway: ProviderGateway,
    agent: AgentSpec,
    prompt: String,
    call: QueryConfig,
    tier: Tier,
) -> AgentResponse {
    let started = Instant::now();
    let outcome = gateway.query(&prompt, &call, tier).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(reply) => AgentResponse {
            agent_id: agent.id,
            role: agent.role,
            provider: reply.used.provider,
            model: reply.used.model,
            text: reply.response.text,
            tokens: reply.response.tokens,
            duration_ms,
            error: None,
        },
        Err(e) => {
            warn!(agent = %agent.label(), error = %e, "agent failed this round");
            failed_response(&agent, e.to_string(), duration_ms)
        }
    }
}

fn failed_response(agent: &AgentSpec, error: String, duration_ms: u64) -> AgentResponse {
    AgentResponse {
        agent_id: agent.id,
        role: agent.role,
        provider: agent.provider,
        model: agent.model.clone(),
        text: String::new(),
        tokens: TokenUsage::default(),
        duration_ms,
        error: Some(error),
    }
}

fn transcript_synthesis(last: Option<&DebateRound>, confidence: Confidence) -> Synthesis {
    let conclusion = last
        .and_then(|round| round.successful().next())
        .map(|r| r.text.trim().to_string())
        .unwrap_or_default();
    Synthesis {
        agreements: Vec::new(),
        disagreements: Vec::new(),
        conclusion,
        confidence,
        follow_up_questions: Vec::new(),
        tokens: TokenUsage::default(),
        model: None,
        degraded: true,
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(280) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn stance_clause(config: &DebateConfig) -> String {
    match &config.consensus {
        Some(options) if !options.labels.is_empty() => format!(
            "Start your answer with your position: one of {}.\n",
            options.labels.join(", ")
        ),
        _ => String::new(),
    }
}

fn round_prompt(
    query: &str,
    round_number: u32,
    agent: &AgentSpec,
    previous: Option<&DebateRound>,
    config: &DebateConfig,
) -> String {
    let stance = stance_clause(config);
    let length = config.response_length.instruction();
    match previous {
        None => {
            let background = config
                .search_context
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(|c| format!("\nBackground material:\n{}\n", c.trim()))
                .unwrap_or_default();
            format!(
                "Question: {query}\n{background}\n\
                 Give your independent answer as the {role}.\n{stance}{length}",
                role = agent.role,
            )
        }
        Some(prev) => format!(
            "Question: {query}\n\n\
             Round {prev_round} responses from all participants:\n\n{transcript}\n\n\
             This is round {round_number}. You are the {role}. Review every answer above, \
             including your own. Say where you agree and where you disagree, revise your \
             position if you were persuaded, and give your updated answer.\n{stance}{length}",
            prev_round = prev.round_number,
            transcript = prev.transcript(),
            role = agent.role,
        ),
    }
}

fn synthesis_prompt(query: &str, rounds: &[DebateRound], length: ResponseLength) -> String {
    let transcript = rounds
        .iter()
        .map(|r| format!("## Round {}\n\n{}", r.round_number, r.transcript()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Question: {query}\n\n\
         Debate transcript:\n\n{transcript}\n\n\
         Synthesize the debate. List the points every participant accepts, the points still \
         contested, and give one conclusion with your confidence between 0 and 1. {length}\n\
         Reply with JSON only: {{\"agreements\": [\"...\"], \"disagreements\": [\"...\"], \
         \"conclusion\": \"...\", \"confidence\": 0.0, \"follow_up_questions\": [\"...\"]}}",
        length = length.instruction(),
    )
}
