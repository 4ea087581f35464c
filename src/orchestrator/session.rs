//! Debate session record and its state machine

use super::consensus::ConsensusResult;
use crate::agent::Role;
use crate::catalog::{estimate_cost, ModelChoice};
use crate::error::Error;
use crate::types::{AgentId, Confidence, ProviderFamily, SessionId, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One agent's turn in a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Agent that was asked
    pub agent_id: AgentId,
    /// Agent role
    pub role: Role,
    /// Provider that answered (differs from the configured one after a fallback)
    pub provider: ProviderFamily,
    /// Model that answered
    pub model: String,
    /// Response text; empty on failure
    pub text: String,
    /// Token usage
    pub tokens: TokenUsage,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    /// Whether the call succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Label used in transcripts
    pub fn label(&self) -> String {
        format!("{} ({}/{})", self.role, self.provider, self.model)
    }
}

/// One settled round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRound {
    /// 1-based round number
    pub round_number: u32,
    /// Responses in agent submission order
    pub responses: Vec<AgentResponse>,
    /// Disagreement among the successful responses, in [0,1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disagreement: Option<f64>,
}

impl DebateRound {
    /// Responses that succeeded
    pub fn successful(&self) -> impl Iterator<Item = &AgentResponse> {
        self.responses.iter().filter(|r| r.is_ok())
    }

    /// Transcript block fed into the next round's prompts
    pub fn transcript(&self) -> String {
        self.responses
            .iter()
            .map(|r| match &r.error {
                None => format!("### {}\n{}", r.label(), r.text.trim()),
                Some(_) => format!("### {}\n(no response this round)", r.label()),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Structured conclusion of a debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    /// Points all agents accept
    pub agreements: Vec<String>,
    /// Points still contested
    pub disagreements: Vec<String>,
    /// Final answer
    pub conclusion: String,
    /// Confidence in the conclusion
    pub confidence: Confidence,
    /// Suggested next questions
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    /// Token usage of the synthesis call
    pub tokens: TokenUsage,
    /// Model that synthesized, if a call succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelChoice>,
    /// Built from the transcript because the synthesis call failed
    #[serde(default)]
    pub degraded: bool,
}

/// Single-model answer computed alongside round 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Baseline model
    pub model: ModelChoice,
    /// Answer text; empty on failure
    pub text: String,
    /// Token usage
    pub tokens: TokenUsage,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not started
    Idle,
    /// Rounds in progress
    Debating,
    /// Finished with a synthesis
    Completed,
    /// Ended by a failure, timeout or cancellation
    Error,
}

impl SessionStatus {
    /// Whether the session can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

/// Why a session ended in error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionError {
    /// Error kind (`timeout`, `cancelled`, `provider`, ...)
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Whether retrying the same request may succeed
    pub retryable: bool,
}

impl From<&Error> for SessionError {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.retry_suggested(),
        }
    }
}

/// Full record of one debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSession {
    /// Session identifier
    pub id: SessionId,
    /// Question debated
    pub query: String,
    /// Configuration snapshot
    pub config: serde_json::Value,
    /// Settled rounds, numbered 1..N without gaps
    pub rounds: Vec<DebateRound>,
    /// Final synthesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<Synthesis>,
    /// Optional consensus over final-round stances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
    /// Optional single-model baseline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    /// Lifecycle state
    pub status: SessionStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, once terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure, if the session ended in error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    /// Tokens across rounds, synthesis and side computations
    pub total_tokens: TokenUsage,
    /// Estimated USD cost of the same
    pub total_cost: f64,
}

impl DebateSession {
    /// New idle session
    pub fn new(query: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            id: SessionId::new(),
            query: query.into(),
            config,
            rounds: Vec::new(),
            synthesis: None,
            consensus: None,
            comparison: None,
            status: SessionStatus::Idle,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            total_tokens: TokenUsage::default(),
            total_cost: 0.0,
        }
    }

    /// `idle -> debating`
    pub fn start(&mut self) {
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Debating;
            self.started_at = Utc::now();
        }
    }

    /// Append a settled round while debating. Returns false once terminal.
    pub fn push_round(&mut self, round: DebateRound) -> bool {
        if self.status != SessionStatus::Debating {
            return false;
        }
        debug_assert_eq!(round.round_number as usize, self.rounds.len() + 1);
        self.rounds.push(round);
        true
    }

    /// `debating -> completed`, or `error` if no round settled.
    /// No-op outside `debating`.
    pub fn complete(&mut self) {
        if self.status != SessionStatus::Debating {
            return;
        }
        if self.rounds.is_empty() {
            self.fail(SessionError {
                kind: "internal".to_string(),
                message: "session finished without any round".to_string(),
                retryable: false,
            });
            return;
        }
        self.recompute_totals();
        self.status = SessionStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// `debating -> error`. No-op outside `debating`.
    pub fn fail(&mut self, error: SessionError) {
        if self.status != SessionStatus::Debating {
            return;
        }
        self.recompute_totals();
        self.error = Some(error);
        self.status = SessionStatus::Error;
        self.ended_at = Some(Utc::now());
    }

    /// Number of settled rounds
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    fn recompute_totals(&mut self) {
        let mut usages: Vec<(String, TokenUsage)> = Vec::new();
        for response in self.rounds.iter().flat_map(|r| r.responses.iter()) {
            usages.push((response.model.clone(), response.tokens));
        }
        if let Some(synthesis) = &self.synthesis {
            let model = synthesis.model.as_ref().map(|m| m.model.clone()).unwrap_or_default();
            usages.push((model, synthesis.tokens));
        }
        if let Some(comparison) = &self.comparison {
            usages.push((comparison.model.model.clone(), comparison.tokens));
        }

        self.total_tokens = usages.iter().map(|(_, t)| *t).sum();
        self.total_cost = usages
            .iter()
            .map(|(model, tokens)| estimate_cost(model, *tokens))
            .sum();
        if let Some(consensus) = &self.consensus {
            self.total_tokens += consensus.total_tokens;
            self.total_cost += consensus.total_cost;
        }
    }
}
