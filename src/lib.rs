//! # Agora
//!
//! Multi-agent research, debate and consensus over heterogeneous LLM backends.
//!
//! ## Features
//!
//! - **Heterogeneous mixing**: one model per role, spread across provider families
//! - **Parallel research**: specialist teams with tool calling and a shared report cache
//! - **Structured debate**: rounds of parallel answers scored for disagreement, then synthesized
//! - **Consensus with a judge**: majority vote, tie-break and degraded-judge handling
//! - **One-hop fallback**: failed calls retry once on a sibling model, with a failure memory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agora::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     agora::telemetry::init_tracing(TelemetryFormat::Text)?;
//!
//!     let engine = Engine::from_settings(EngineSettings::load(None)?)?;
//!     let request = EngineRequest::new("Which laptop under $800 is best for students?")
//!         .with_rounds(2)
//!         .with_auto_extra_round();
//!
//!     let outcome = engine.run(request, None, CancellationToken::new()).await?;
//!     if let Some(synthesis) = &outcome.session.synthesis {
//!         println!("{} ({})", synthesis.conclusion, synthesis.confidence);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod provider;
pub mod research;
pub mod selector;
pub mod telemetry;
pub mod tools;
pub mod types;

// Re-exports for convenience
pub use agent::{AgentSpec, Role};
pub use catalog::{ModelChoice, ModelSpec};
pub use classifier::{classify, Complexity, QueryAnalysis, QueryType};
pub use config::{EngineSettings, ProviderEndpoint};
pub use engine::{Engine, EngineOutcome, EngineRequest, ResearchSpec};
pub use error::{Error, Result};
pub use events::{ChannelSink, CollectingSink, EventKind, EventSink, ProgressEvent};
pub use gateway::{FallbackMemory, FallbackTable, GatewayResponse, OpenAiCompatProvider, ProviderGateway};
pub use orchestrator::{
    ConsensusAggregator, ConsensusRequest, ConsensusResult, DebateConfig, DebateEngine,
    DebateSession, DebateTemplate, DisagreementStrategy, LexicalDivergence, SessionStatus,
    StanceVariance, Synthesis, Verdict,
};
pub use provider::{ModelProvider, ModelResponse, QueryConfig};
pub use research::{ResearchCoordinator, ResearchReport, ResearchRequest};
pub use selector::{ModelSelector, SelectionPlan};
pub use telemetry::TelemetryFormat;
pub use tools::{Tool, ToolRegistry};
pub use types::{
    AgentId, Confidence, PerformanceTarget, ProviderFamily, ResponseLength, SessionId, Tier,
    Timeframe, TokenUsage,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::agent::{AgentSpec, Role};
    pub use crate::catalog::ModelChoice;
    pub use crate::config::EngineSettings;
    pub use crate::engine::{Engine, EngineOutcome, EngineRequest};
    pub use crate::error::{Error, Result};
    pub use crate::orchestrator::{DebateConfig, DebateSession, SessionStatus};
    pub use crate::provider::ModelProvider;
    pub use crate::telemetry::TelemetryFormat;
    pub use crate::types::*;
}
