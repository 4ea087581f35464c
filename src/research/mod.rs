//! Parallel specialist research
//!
//! A [`ResearchCoordinator`] confirms the subject with one cheap call, hands
//! every specialist the same sparse seed, runs them concurrently with tools,
//! and waits for all of them before publishing the report to the cache.

mod cache;
mod specialists;

pub use cache::{CacheKey, InMemoryReportCache, ReportCache};
pub use specialists::Focus;

use crate::agent::Role;
use crate::catalog::{self, ModelChoice};
use crate::classifier::classify;
use crate::config::ResearchSettings;
use crate::decode::{decode, Decoded};
use crate::error::{Error, Result};
use crate::events::{Emitter, EventKind};
use crate::gateway::ProviderGateway;
use crate::provider::QueryConfig;
use crate::selector::ModelSelector;
use crate::tools::research_tools;
use crate::types::{PerformanceTarget, ProviderFamily, Tier, Timeframe, TokenUsage};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchAgentResult {
    /// Specialist slot
    pub role: Role,
    /// Focus area
    pub focus: Focus,
    /// Provider that answered
    pub provider: ProviderFamily,
    /// Model that answered
    pub model: String,
    /// Number of tool invocations
    pub tool_call_count: u32,
    /// Distinct tools used, in first-use order
    pub tool_names: Vec<String>,
    /// Whether the specialist succeeded using at least one tool
    pub tools_used: bool,
    /// Findings text; empty on failure
    pub findings: String,
    /// Token usage
    pub tokens: TokenUsage,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchAgentResult {
    /// Whether the specialist failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated research; immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    /// Subject as requested
    pub subject: String,
    /// Canonical name reported by the fact check
    pub canonical_name: String,
    /// One-line summary from the fact check
    pub summary: String,
    /// Timeframe
    pub timeframe: Timeframe,
    /// One entry per specialist, in launch order
    pub results: Vec<ResearchAgentResult>,
    /// Tool calls across all specialists
    pub total_tool_calls: u32,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Completion time
    pub created_at: DateTime<Utc>,
}

impl ResearchReport {
    /// Findings of successful specialists, headed by role and focus
    pub fn digest(&self) -> String {
        self.results
            .iter()
            .filter(|r| !r.is_error() && !r.findings.trim().is_empty())
            .map(|r| format!("[{} / {:?}]\n{}", r.role, r.focus, r.findings.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Total tokens across specialists
    pub fn total_tokens(&self) -> TokenUsage {
        self.results.iter().map(|r| r.tokens).sum()
    }

    #[cfg(test)]
    pub(crate) fn empty(subject: &str, timeframe: Timeframe) -> Self {
        Self {
            subject: subject.to_string(),
            canonical_name: subject.to_string(),
            summary: String::new(),
            timeframe,
            results: Vec::new(),
            total_tool_calls: 0,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// Inputs for one report
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    /// Subject identifier (ticker, product, topic)
    pub subject: String,
    /// Timeframe
    pub timeframe: Timeframe,
    /// Read-only context document exposed through `lookup_context`
    pub context: Arc<Value>,
    /// Caller tier
    pub tier: Tier,
    /// Use this model for every specialist instead of selecting
    pub model_override: Option<ModelChoice>,
}

impl ResearchRequest {
    /// Create a request with an empty context
    pub fn new(subject: impl Into<String>, timeframe: Timeframe, tier: Tier) -> Self {
        Self {
            subject: subject.into(),
            timeframe,
            context: Arc::new(Value::Object(Default::default())),
            tier,
            model_override: None,
        }
    }

    /// Set the context document
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Force one model for all specialists
    pub fn with_model(mut self, choice: ModelChoice) -> Self {
        self.model_override = Some(choice);
        self
    }
}

#[derive(Debug, Deserialize)]
struct FactCheck {
    exists: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Runs specialist teams and caches their reports
pub struct ResearchCoordinator {
    gateway: ProviderGateway,
    cache: Arc<dyn ReportCache>,
    selector: ModelSelector,
    settings: ResearchSettings,
}

impl ResearchCoordinator {
    /// Create a coordinator
    pub fn new(
        gateway: ProviderGateway,
        cache: Arc<dyn ReportCache>,
        selector: ModelSelector,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            gateway,
            cache,
            selector,
            settings,
        }
    }

    /// Produce (or fetch from cache) the report for a subject
    pub async fn research(&self, request: ResearchRequest, emitter: &Emitter) -> Result<Arc<ResearchReport>> {
        let subject = request.subject.trim();
        if subject.is_empty() {
            return Err(Error::validation("research subject must not be empty"));
        }

        let key = CacheKey::new(subject, request.timeframe);
        if let Some(report) = self.cache.get(&key).await {
            debug!(subject, timeframe = request.timeframe.as_str(), "research cache hit");
            return Ok(report);
        }

        // resolve every model before the first paid call
        let checker = self.fact_check_model(&request)?;
        let models = self.assign_models(subject, &request)?;

        let started = Instant::now();
        let (canonical_name, summary) = self.fact_check(subject, &request, checker).await?;
        let seed = format!(
            "Subject: {}\nTimeframe: {}\nBriefing: {}",
            canonical_name,
            request.timeframe.as_str(),
            summary
        );
        let tools = Arc::new(research_tools(request.context.clone()));

        info!(subject, specialists = models.len(), "launching research specialists");
        let runs = models.into_iter().enumerate().map(|(index, choice)| {
            let role = Role::Specialist((index + 1).min(u8::MAX as usize) as u8);
            let focus = Focus::for_index(index);
            let config = QueryConfig::new(&choice)
                .with_temperature(role.default_temperature())
                .with_max_tokens(self.settings.max_tokens)
                .with_system(specialists::system_prompt(focus))
                .with_tools(tools.clone(), self.settings.max_steps);
            let prompt = specialists::task_prompt(&seed, request.timeframe);
            self.run_specialist(role, focus, prompt, config, request.tier, emitter)
        });
        let results = join_all(runs).await;

        let total_tool_calls = results
            .iter()
            .filter(|r| !r.is_error())
            .map(|r| r.tool_call_count)
            .sum();
        let failed = results.iter().filter(|r| r.is_error()).count();

        let report = Arc::new(ResearchReport {
            subject: subject.to_string(),
            canonical_name,
            summary,
            timeframe: request.timeframe,
            results,
            total_tool_calls,
            duration_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        });
        info!(
            subject,
            total_tool_calls,
            failed,
            duration_ms = report.duration_ms,
            "research report complete"
        );

        self.cache
            .set(key, report.clone(), request.timeframe.cache_ttl())
            .await;
        Ok(report)
    }

    async fn fact_check(
        &self,
        subject: &str,
        request: &ResearchRequest,
        choice: ModelChoice,
    ) -> Result<(String, String)> {
        let config = QueryConfig::new(&choice).with_temperature(0.0).with_max_tokens(300);
        let overview = request.context.get("overview").and_then(Value::as_str);
        let prompt = specialists::fact_check_prompt(subject, overview);

        let answer = self.gateway.query(&prompt, &config, request.tier).await?;
        let text = answer.response.text;
        match decode::<FactCheck>(&text) {
            Decoded::Complete(check) if !check.exists => Err(Error::validation(format!(
                "subject '{}' could not be confirmed",
                subject
            ))),
            Decoded::Complete(check) => Ok((
                check.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| subject.to_string()),
                check.summary.unwrap_or_default(),
            )),
            _ => {
                debug!(subject, "fact check reply was not JSON; using it verbatim");
                Ok((subject.to_string(), text.trim().to_string()))
            }
        }
    }

    fn assign_models(&self, subject: &str, request: &ResearchRequest) -> Result<Vec<ModelChoice>> {
        let count = self.settings.specialists.max(1);
        if let Some(choice) = &request.model_override {
            return Ok(vec![choice.clone(); count]);
        }

        let roles: Vec<Role> = (1..=count)
            .map(|n| Role::Specialist(n.min(u8::MAX as usize) as u8))
            .collect();
        let analysis = classify(&format!(
            "Research {} over the {} timeframe",
            subject,
            request.timeframe.as_str()
        ));
        let plan = self
            .selector
            .select(&analysis, &roles, request.tier, PerformanceTarget::Balance)?;
        let plan = self.selector.validate(plan, &analysis, |choice| {
            self.gateway.is_model_available(choice, request.tier)
        })?;
        Ok(plan.recommendations.iter().map(|r| r.choice()).collect())
    }

    fn fact_check_model(&self, request: &ResearchRequest) -> Result<ModelChoice> {
        if let Some(choice) = &request.model_override {
            return Ok(choice.clone());
        }
        catalog::cheapest_for(request.tier, false, |m| self.gateway.is_configured(m.family))
            .map(|m| m.choice())
            .ok_or_else(|| Error::configuration(format!("no configured model for tier {:?}", request.tier)))
    }

    async fn run_specialist(
        &self,
        role: Role,
        focus: Focus,
        prompt: String,
        config: QueryConfig,
        tier: Tier,
        emitter: &Emitter,
    ) -> ResearchAgentResult {
        emitter.emit(EventKind::AgentStart {
            role: role.to_string(),
            model: config.model.clone(),
            provider: config.provider,
        });
        let started = Instant::now();
        let outcome = self.gateway.query(&prompt, &config, tier).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(answer) => {
                let tool_call_count = answer.response.tool_calls.len() as u32;
                ResearchAgentResult {
                    role,
                    focus,
                    provider: answer.used.provider,
                    model: answer.used.model.clone(),
                    tool_call_count,
                    tool_names: answer.response.tool_names(),
                    tools_used: tool_call_count > 0,
                    findings: answer.response.text,
                    tokens: answer.response.tokens,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!(role = %role, model = %config.model, error = %e, "specialist failed");
                ResearchAgentResult {
                    role,
                    focus,
                    provider: config.provider,
                    model: config.model.clone(),
                    tool_call_count: 0,
                    tool_names: Vec::new(),
                    tools_used: false,
                    findings: String::new(),
                    tokens: TokenUsage::default(),
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        };

        emitter.emit(EventKind::AgentComplete {
            role: role.to_string(),
            tool_calls: result.tool_call_count,
            duration_ms,
            error: result.error.clone(),
        });
        result
    }
}

impl std::fmt::Debug for ResearchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchCoordinator")
            .field("gateway", &self.gateway)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::gateway::{FallbackMemory, FallbackTable};
    use crate::provider::{ModelProvider, ModelResponse, ToolCallRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers fact checks with JSON and specialists with scripted tool use;
    /// the risks specialist fails.
    struct ResearchProvider {
        calls: AtomicUsize,
        exists: bool,
        family: ProviderFamily,
    }

    #[async_trait]
    impl ModelProvider for ResearchProvider {
        async fn query(&self, prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("\"exists\"") {
                let body = format!(
                    r#"```json
{{"exists": {}, "name": "ACME Corp", "summary": "Maker of anvils."}}
```"#,
                    self.exists
                );
                return Ok(ModelResponse::text(body, TokenUsage::new(20, 10)));
            }
            let system = config.system.clone().unwrap_or_default();
            if system.contains("Risks") {
                return Err(Error::provider("openai", &config.model, "upstream timeout"));
            }
            let calls = if system.contains("Quantitative") { 3 } else { 2 };
            let records = (0..calls)
                .map(|_| ToolCallRecord {
                    name: "lookup_context".into(),
                    arguments: serde_json::json!({ "section": "index" }),
                    success: true,
                })
                .collect();
            Ok(ModelResponse::text("- finding", TokenUsage::new(100, 50)).with_tool_calls(records))
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn family(&self) -> ProviderFamily {
            self.family
        }

        fn client_type(&self) -> &str {
            "scripted"
        }
    }

    fn coordinator(exists: bool) -> (ResearchCoordinator, Arc<ResearchProvider>) {
        coordinator_for(ProviderFamily::OpenAi, exists)
    }

    fn coordinator_for(family: ProviderFamily, exists: bool) -> (ResearchCoordinator, Arc<ResearchProvider>) {
        let provider = Arc::new(ResearchProvider {
            calls: AtomicUsize::new(0),
            exists,
            family,
        });
        let gateway = ProviderGateway::new(Arc::new(FallbackMemory::default()))
            .with_provider(provider.clone())
            .with_fallback_table(FallbackTable::empty());
        let coordinator = ResearchCoordinator::new(
            gateway,
            Arc::new(InMemoryReportCache::default()),
            ModelSelector::new(),
            ResearchSettings::default(),
        );
        (coordinator, provider)
    }

    fn request() -> ResearchRequest {
        ResearchRequest::new("ACME", Timeframe::Day, Tier::Pro)
            .with_context(serde_json::json!({ "overview": "ACME makes anvils" }))
    }

    #[tokio::test]
    async fn test_failed_specialist_degrades_only_its_entry() {
        let (coordinator, _) = coordinator(true);
        let sink = Arc::new(CollectingSink::new());
        let report = coordinator
            .research(request(), &Emitter::new(sink.clone()))
            .await
            .unwrap();

        assert_eq!(report.results.len(), 4);
        let failed: Vec<_> = report.results.iter().filter(|r| r.is_error()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].findings, "");
        assert!(!failed[0].tools_used);
        assert_eq!(report.total_tool_calls, 2 + 2 + 3);
        assert_eq!(report.canonical_name, "ACME Corp");

        let names = sink.names();
        assert_eq!(names.iter().filter(|n| **n == "agent_start").count(), 4);
        assert_eq!(names.iter().filter(|n| **n == "agent_complete").count(), 4);
    }

    #[tokio::test]
    async fn test_second_request_hits_cache() {
        let (coordinator, provider) = coordinator(true);
        let first = coordinator.research(request(), &Emitter::disabled()).await.unwrap();
        let calls_after_first = provider.calls.load(Ordering::SeqCst);
        let second = coordinator.research(request(), &Emitter::disabled()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_unknown_subject_raises() {
        let (coordinator, provider) = coordinator(false);
        let err = coordinator.research(request(), &Emitter::disabled()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // only the fact check ran
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let (coordinator, provider) = coordinator(true);
        let err = coordinator
            .research(ResearchRequest::new("  ", Timeframe::Day, Tier::Pro), &Emitter::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unassignable_models_fail_before_any_call() {
        // Groq serves nothing on the subscription tier
        let (coordinator, provider) = coordinator_for(ProviderFamily::Groq, true);
        let err = coordinator
            .research(
                ResearchRequest::new("ACME", Timeframe::Day, Tier::Subscription),
                &Emitter::disabled(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fact_check_uses_cheapest_configured_model() {
        let (coordinator, _) = coordinator(true);
        let choice = coordinator.fact_check_model(&request()).unwrap();
        assert_eq!(choice, ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o-mini"));

        let forced = ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o");
        let choice = coordinator
            .fact_check_model(&request().with_model(forced.clone()))
            .unwrap();
        assert_eq!(choice, forced);
    }
}
