//! Orchestrator module - debates and consensus
//!
//! - **Debate**: every agent answers each round in parallel, sees the whole
//!   previous round, and a synthesizer closes the session
//! - **Consensus**: independent verdicts, plurality vote, judge explanation
//!
//! # Example
//!
//! ```rust,ignore
//! use agora::orchestrator::{DebateEngine, DebateTemplate};
//!
//! let template = DebateTemplate::from_file("templates/laptop-review.yaml")?;
//! let config = template.to_config(Tier::Pro, Duration::from_secs(180));
//! let session = DebateEngine::new(gateway)
//!     .run("Best budget laptop for video editing?", config, &Emitter::disabled(), CancellationToken::new())
//!     .await?;
//! ```

pub mod config;
pub mod consensus;
pub mod debate;
pub mod disagreement;
pub mod session;

// Re-exports
pub use config::{DebateTemplate, DisagreementKind};
pub use consensus::{
    ConsensusAggregator, ConsensusRequest, ConsensusResult, JudgeDecision, TieBreak, Verdict,
    JUDGE_UNAVAILABLE_PENALTY,
};
pub use debate::{ConsensusOptions, DebateConfig, DebateEngine, DEFAULT_ROUNDS, MAX_ROUNDS};
pub use disagreement::{DisagreementStrategy, LexicalDivergence, StanceVariance};
pub use session::{
    AgentResponse, Comparison, DebateRound, DebateSession, SessionError, SessionStatus, Synthesis,
};
