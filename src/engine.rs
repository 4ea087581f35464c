//! Top-level facade
//!
//! [`Engine`] wires the classifier, selector, research coordinator, debate
//! engine and consensus aggregator around one gateway. Every public entry
//! point passes the admission limiter exactly once; internal fan-out never
//! does.

use crate::agent::{AgentSpec, Role};
use crate::catalog::ModelChoice;
use crate::classifier::{classify, QueryAnalysis};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::events::{Emitter, EventKind, EventSink};
use crate::gateway::{FallbackMemory, ProviderGateway};
use crate::orchestrator::{
    ConsensusAggregator, ConsensusOptions, ConsensusRequest, ConsensusResult, DebateConfig,
    DebateEngine, DebateSession, DisagreementStrategy,
};
use crate::research::{InMemoryReportCache, ReportCache, ResearchCoordinator, ResearchReport, ResearchRequest};
use crate::selector::{ModelSelector, SelectionPlan};
use crate::types::{PerformanceTarget, ResponseLength, Tier, Timeframe};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Subject research attached to a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSpec {
    /// Subject identifier
    pub subject: String,
    /// Timeframe
    #[serde(default)]
    pub timeframe: Timeframe,
    /// Read-only context document for the `lookup_context` tool
    #[serde(default)]
    pub context: Value,
}

/// One end-to-end request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Question to debate
    pub query: String,
    /// Debate roles, one agent each
    #[serde(default = "default_roles")]
    pub roles: Vec<Role>,
    /// Caller tier; the settings default applies when absent
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Quality/cost trade-off
    #[serde(default)]
    pub target: PerformanceTarget,
    /// Configured rounds; the settings default applies when absent
    #[serde(default)]
    pub rounds: Option<u32>,
    /// Response length mode
    #[serde(default)]
    pub response_length: ResponseLength,
    /// Research to run before the debate
    #[serde(default)]
    pub research: Option<ResearchSpec>,
    /// Stance labels for a consensus over the final round
    #[serde(default)]
    pub consensus_labels: Vec<String>,
    /// Baseline model answered alongside round 1
    #[serde(default)]
    pub comparison: Option<ModelChoice>,
    /// Force a second round on high round-1 disagreement
    #[serde(default)]
    pub auto_extra_round: bool,
}

fn default_roles() -> Vec<Role> {
    vec![Role::Analyst, Role::Critic, Role::Synthesizer]
}

impl EngineRequest {
    /// Request with default roles and settings
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            roles: default_roles(),
            tier: None,
            target: PerformanceTarget::default(),
            rounds: None,
            response_length: ResponseLength::default(),
            research: None,
            consensus_labels: Vec::new(),
            comparison: None,
            auto_extra_round: false,
        }
    }

    /// Set the debate roles
    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    /// Set the tier
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Set the performance target
    pub fn with_target(mut self, target: PerformanceTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the configured rounds
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = Some(rounds);
        self
    }

    /// Set the response length
    pub fn with_response_length(mut self, length: ResponseLength) -> Self {
        self.response_length = length;
        self
    }

    /// Research `subject` first and feed the findings into round 1
    pub fn with_research(mut self, subject: impl Into<String>, timeframe: Timeframe, context: Value) -> Self {
        self.research = Some(ResearchSpec {
            subject: subject.into(),
            timeframe,
            context,
        });
        self
    }

    /// Aggregate final-round stances over `labels`
    pub fn with_consensus<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.consensus_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Answer with a single baseline model alongside round 1
    pub fn with_comparison(mut self, choice: ModelChoice) -> Self {
        self.comparison = Some(choice);
        self
    }

    /// Enable the auto extra round
    pub fn with_auto_extra_round(mut self) -> Self {
        self.auto_extra_round = true;
        self
    }
}

/// Everything one request produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutcome {
    /// Classifier output
    pub analysis: QueryAnalysis,
    /// Validated model assignment
    pub plan: SelectionPlan,
    /// Research report, when one was requested and succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchReport>,
    /// Debate record
    pub session: DebateSession,
    /// End-to-end wall time in milliseconds
    pub duration_ms: u64,
}

/// Orchestration engine
pub struct Engine {
    settings: EngineSettings,
    gateway: ProviderGateway,
    selector: ModelSelector,
    research: ResearchCoordinator,
    debate: DebateEngine,
    consensus: ConsensusAggregator,
    limiter: DefaultDirectRateLimiter,
}

impl Engine {
    /// Build an engine around an existing gateway and report cache
    pub fn new(settings: EngineSettings, gateway: ProviderGateway, cache: Arc<dyn ReportCache>) -> Result<Self> {
        settings.validate()?;
        let per_minute = NonZeroU32::new(settings.admission.requests_per_minute)
            .ok_or_else(|| Error::configuration("admission.requests_per_minute must be positive"))?;
        let burst = NonZeroU32::new(settings.admission.burst)
            .ok_or_else(|| Error::configuration("admission.burst must be positive"))?;
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute).allow_burst(burst));

        let selector = ModelSelector::new();
        Ok(Self {
            research: ResearchCoordinator::new(
                gateway.clone(),
                cache,
                selector.clone(),
                settings.research.clone(),
            ),
            debate: DebateEngine::new(gateway.clone()),
            consensus: ConsensusAggregator::new(gateway.clone()),
            selector,
            gateway,
            settings,
            limiter,
        })
    }

    /// Build an engine from settings, with providers taken from the environment
    pub fn from_settings(settings: EngineSettings) -> Result<Self> {
        let memory = Arc::new(FallbackMemory::new(
            settings.fallback.memory_capacity,
            settings.fallback_ttl(),
        ));
        let gateway = ProviderGateway::from_env(memory)?;
        let cache = Arc::new(InMemoryReportCache::new(settings.research.cache_capacity));
        Self::new(settings, gateway, cache)
    }

    /// Replace the debate's disagreement strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn DisagreementStrategy>) -> Self {
        self.debate = self.debate.with_strategy(strategy);
        self
    }

    /// Active settings
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Underlying gateway
    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Classify a query. Not admission-checked; makes no model call.
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        classify(query)
    }

    /// Select and validate one model per role. Makes no model call.
    pub fn plan(
        &self,
        analysis: &QueryAnalysis,
        roles: &[Role],
        tier: Tier,
        target: PerformanceTarget,
    ) -> Result<SelectionPlan> {
        let plan = self.selector.select(analysis, roles, tier, target)?;
        self.selector
            .validate(plan, analysis, |choice| self.gateway.is_model_available(choice, tier))
    }

    /// Produce (or fetch from cache) a research report
    pub async fn research(
        &self,
        request: ResearchRequest,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Arc<ResearchReport>> {
        self.admit("research")?;
        self.research.research(request, &Emitter::from_option(sink)).await
    }

    /// Run a debate with a caller-built configuration
    pub async fn debate(
        &self,
        query: &str,
        config: DebateConfig,
        sink: Option<Arc<dyn EventSink>>,
        cancel: CancellationToken,
    ) -> Result<DebateSession> {
        self.admit("debate")?;
        self.debate
            .run(query, config, &Emitter::from_option(sink), cancel)
            .await
    }

    /// Collect verdicts from `panel` and aggregate them
    pub async fn consensus(&self, request: &ConsensusRequest, panel: &[ModelChoice]) -> Result<ConsensusResult> {
        self.admit("consensus")?;
        self.consensus.run(request, panel).await
    }

    /// classify, select, validate, optionally research, then debate
    pub async fn run(
        &self,
        request: EngineRequest,
        sink: Option<Arc<dyn EventSink>>,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome> {
        self.admit("run")?;
        let started = Instant::now();

        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        let tier = request.tier.unwrap_or(self.settings.default_tier);
        let emitter = Emitter::from_option(sink);

        let analysis = classify(query);
        let plan = self.plan(&analysis, &request.roles, tier, request.target)?;
        info!(
            query_type = %analysis.primary_type,
            families = plan.families().len(),
            ?tier,
            "plan ready"
        );

        // every request-level check happens before the first paid call
        let mut config = self.debate_config(&request, &plan, tier);
        config.validate()?;

        let research = match &request.research {
            Some(spec) => {
                let budget = self.settings.session_timeout();
                self.research_phase(spec, tier, &emitter, &cancel, budget).await?
            }
            None => None,
        };
        if let Some(digest) = research
            .as_deref()
            .map(ResearchReport::digest)
            .filter(|d| !d.is_empty())
        {
            config = config.with_search_context(digest);
        }

        // research and debate share one session budget
        let remaining = config.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(Error::Timeout(format!(
                "session budget of {}s spent before the debate started",
                config.timeout.as_secs_f64()
            )));
        }
        let config = config.with_timeout(remaining);
        let session = self.debate.run(query, config, &emitter, cancel).await?;

        Ok(EngineOutcome {
            analysis,
            plan,
            research: research.map(|report| (*report).clone()),
            session,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn research_phase(
        &self,
        spec: &ResearchSpec,
        tier: Tier,
        emitter: &Emitter,
        cancel: &CancellationToken,
        budget: Duration,
    ) -> Result<Option<Arc<ResearchReport>>> {
        let request = ResearchRequest::new(spec.subject.clone(), spec.timeframe, tier)
            .with_context(spec.context.clone());
        let work = self.research.research(request, emitter);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled("research aborted by caller".to_string())),
            result = tokio::time::timeout(budget, work) => result.unwrap_or_else(|_| {
                Err(Error::Timeout(format!("research exceeded {}s", budget.as_secs_f64())))
            }),
        };

        match outcome {
            Ok(report) => Ok(Some(report)),
            Err(e) if e.is_session_terminal() => {
                warn!(subject = %spec.subject, error = %e, "research aborted");
                emitter.emit(EventKind::Error {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
            Err(e) => {
                warn!(subject = %spec.subject, error = %e, "research failed; debating without it");
                Ok(None)
            }
        }
    }

    fn debate_config(&self, request: &EngineRequest, plan: &SelectionPlan, tier: Tier) -> DebateConfig {
        let agents = plan
            .recommendations
            .iter()
            .map(|rec| AgentSpec::new(rec.role, &rec.choice()))
            .collect();
        let defaults = &self.settings.debate;
        let mut config = DebateConfig::new(agents)
            .with_rounds(request.rounds.unwrap_or(defaults.rounds))
            .with_response_length(request.response_length)
            .with_tier(tier)
            .with_timeout(self.settings.session_timeout());

        if request.auto_extra_round {
            config = config.with_auto_extra_round(defaults.disagreement_threshold);
        }
        if defaults.early_stop_threshold > 0.0 {
            config = config.with_early_stop(defaults.early_stop_threshold);
        }
        if let Some(choice) = &request.comparison {
            config = config.with_comparison(choice.clone());
        }
        if !request.consensus_labels.is_empty() {
            config = config.with_consensus(ConsensusOptions {
                labels: request.consensus_labels.clone(),
                judge: None,
            });
        }
        config
    }

    fn admit(&self, entry: &str) -> Result<()> {
        self.limiter.check().map_err(|_| {
            warn!(entry, "admission limiter rejected request");
            Error::RateLimitExceeded(format!("{} rejected by the admission limiter", entry))
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("gateway", &self.gateway)
            .finish()
    }
}
