//! Provider gateway: routes calls to backends and substitutes a fallback
//! model when a call fails.
//!
//! One logical call makes at most two attempts: the requested model and, on
//! failure, the first eligible candidate from the [`FallbackTable`].
//! Subscription-billed tiers never fall back.

mod fallback;
mod openai_compat;

pub use fallback::{FailureRecord, FallbackMemory, FallbackTable};
pub use openai_compat::{CompletionRequest, CompletionResponse, Message, OpenAiCompatProvider};

use crate::catalog::{self, ModelChoice};
use crate::error::{Error, Result};
use crate::provider::{ModelProvider, ModelResponse, QueryConfig};
use crate::types::{ProviderFamily, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A response together with the model that actually produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Backend response
    pub response: ModelResponse,
    /// Model that answered
    pub used: ModelChoice,
    /// Originally requested model when a fallback answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<ModelChoice>,
}

impl GatewayResponse {
    /// Whether a fallback model answered
    pub fn used_fallback(&self) -> bool {
        self.fallback_from.is_some()
    }
}

/// Routes calls to registered backends with a one-hop fallback
#[derive(Clone)]
pub struct ProviderGateway {
    providers: HashMap<ProviderFamily, Arc<dyn ModelProvider>>,
    table: Arc<FallbackTable>,
    memory: Arc<FallbackMemory>,
}

impl ProviderGateway {
    /// Gateway with no backends, the catalog fallback table and the given memory
    pub fn new(memory: Arc<FallbackMemory>) -> Self {
        Self {
            providers: HashMap::new(),
            table: Arc::new(FallbackTable::from_catalog()),
            memory,
        }
    }

    /// Gateway with an HTTP backend for every family whose key is present
    pub fn from_env(memory: Arc<FallbackMemory>) -> Result<Self> {
        let mut gateway = Self::new(memory);
        for family in ProviderFamily::ALL {
            let provider = OpenAiCompatProvider::from_env(family)?;
            if provider.is_configured() {
                debug!(provider = %family, "registered provider from environment");
                gateway = gateway.with_provider(Arc::new(provider));
            }
        }
        if gateway.providers.is_empty() {
            warn!("no provider API keys found in the environment");
        }
        Ok(gateway)
    }

    /// Register a backend for its family, replacing any existing one
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.insert(provider.family(), provider);
        self
    }

    /// Replace the fallback table
    pub fn with_fallback_table(mut self, table: FallbackTable) -> Self {
        self.table = Arc::new(table);
        self
    }

    /// Shared failure memory
    pub fn memory(&self) -> &Arc<FallbackMemory> {
        &self.memory
    }

    /// Whether a configured backend serves `family`
    pub fn is_configured(&self, family: ProviderFamily) -> bool {
        self.providers
            .get(&family)
            .is_some_and(|provider| provider.is_configured())
    }

    /// Families with a configured backend, in declaration order
    pub fn configured_families(&self) -> Vec<ProviderFamily> {
        ProviderFamily::ALL
            .into_iter()
            .filter(|family| self.is_configured(*family))
            .collect()
    }

    /// Whether `choice` can be called for `tier` right now.
    ///
    /// Models outside the catalog are accepted when their backend is configured.
    pub fn is_model_available(&self, choice: &ModelChoice, tier: Tier) -> bool {
        self.is_configured(choice.provider)
            && catalog::lookup(&choice.model).map_or(true, |spec| spec.available_for(tier))
    }

    /// Issue one logical call with at most one fallback hop
    pub async fn query(&self, prompt: &str, config: &QueryConfig, tier: Tier) -> Result<GatewayResponse> {
        let primary = config.choice();
        let first_error = match self.attempt(prompt, config).await {
            Ok(response) => {
                return Ok(GatewayResponse {
                    response,
                    used: primary,
                    fallback_from: None,
                })
            }
            Err(e) => e,
        };
        self.memory.record_failure(&primary.model, first_error.to_string());

        if tier.is_subscription_billed() {
            warn!(model = %primary, error = %first_error, "call failed; fallback disabled for subscription tier");
            return Err(first_error);
        }

        let Some(next) = self.pick_fallback(&primary, tier, config.use_tools) else {
            warn!(model = %primary, error = %first_error, "call failed; no eligible fallback");
            return Err(Error::provider(
                primary.provider.as_str(),
                &primary.model,
                format!("no fallback available: {}", first_error),
            ));
        };

        info!(from = %primary, to = %next, error = %first_error, "falling back");
        match self.attempt(prompt, &config.retarget(&next)).await {
            Ok(response) => Ok(GatewayResponse {
                response,
                used: next,
                fallback_from: Some(primary),
            }),
            Err(e) => {
                self.memory.record_failure(&next.model, e.to_string());
                warn!(from = %primary, to = %next, error = %e, "fallback failed");
                Err(Error::provider(
                    next.provider.as_str(),
                    &next.model,
                    format!("fallback from {} exhausted: {}", primary, e),
                ))
            }
        }
    }

    async fn attempt(&self, prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
        let provider = self
            .providers
            .get(&config.provider)
            .filter(|provider| provider.is_configured())
            .ok_or_else(|| {
                Error::provider(config.provider.as_str(), &config.model, "provider not configured")
            })?;

        let response = provider.query(prompt, config).await?;
        match &response.error {
            Some(message) => Err(Error::provider(
                config.provider.as_str(),
                &config.model,
                message.clone(),
            )),
            None => Ok(response),
        }
    }

    /// First eligible candidate; recently failing ones are tried last
    fn pick_fallback(&self, primary: &ModelChoice, tier: Tier, needs_tools: bool) -> Option<ModelChoice> {
        let mut candidates: Vec<&ModelChoice> = self
            .table
            .candidates(&primary.model)
            .iter()
            .filter(|c| *c != primary)
            .filter(|c| self.is_model_available(c, tier))
            .filter(|c| !needs_tools || catalog::lookup(&c.model).map_or(true, |s| s.supports_tools))
            .collect();
        candidates.sort_by_key(|c| self.memory.failed_recently(&c.model));
        candidates.first().map(|c| (*c).clone())
    }
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("providers", &self.configured_families())
            .field("memory", &self.memory.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Backend that fails for the listed models and records every call
    struct ScriptedProvider {
        family: ProviderFamily,
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(family: ProviderFamily, failing: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                family,
                failing,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn query(&self, _prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
            self.calls.lock().push(config.model.clone());
            if self.failing.contains(&config.model.as_str()) {
                return Err(Error::provider(self.family.as_str(), &config.model, "503"));
            }
            Ok(ModelResponse::text(format!("answer from {}", config.model), TokenUsage::new(5, 5)))
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

    fn memory() -> Arc<FallbackMemory> {
        Arc::new(FallbackMemory::new(16, Duration::from_secs(600)))
    }

    fn config(family: ProviderFamily, model: &str) -> QueryConfig {
        QueryConfig::new(&ModelChoice::new(family, model))
    }

    #[tokio::test]
    async fn test_success_without_fallback() {
        let openai = ScriptedProvider::new(ProviderFamily::OpenAi, vec![]);
        let gateway = ProviderGateway::new(memory()).with_provider(openai.clone());
        let result = gateway
            .query("hi", &config(ProviderFamily::OpenAi, "gpt-4o"), Tier::Pro)
            .await
            .unwrap();
        assert!(!result.used_fallback());
        assert_eq!(openai.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_single_fallback_hop() {
        let openai = ScriptedProvider::new(ProviderFamily::OpenAi, vec!["gpt-4o"]);
        let anthropic = ScriptedProvider::new(ProviderFamily::Anthropic, vec![]);
        let table = FallbackTable::empty().with_chain(
            "gpt-4o",
            vec![ModelChoice::new(ProviderFamily::Anthropic, "claude-sonnet-4")],
        );
        let gateway = ProviderGateway::new(memory())
            .with_provider(openai)
            .with_provider(anthropic)
            .with_fallback_table(table);

        let result = gateway
            .query("hi", &config(ProviderFamily::OpenAi, "gpt-4o"), Tier::Pro)
            .await
            .unwrap();
        assert_eq!(result.used.model, "claude-sonnet-4");
        assert_eq!(result.fallback_from.unwrap().model, "gpt-4o");
        assert!(gateway.memory().failed_recently("gpt-4o"));
    }

    #[tokio::test]
    async fn test_exhausted_fallback_is_terminal() {
        let openai = ScriptedProvider::new(ProviderFamily::OpenAi, vec!["gpt-4o", "gpt-4o-mini"]);
        let table = FallbackTable::empty()
            .with_chain("gpt-4o", vec![ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o-mini")])
            .with_chain("gpt-4o-mini", vec![ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o")]);
        let gateway = ProviderGateway::new(memory())
            .with_provider(openai.clone())
            .with_fallback_table(table);

        let err = gateway
            .query("hi", &config(ProviderFamily::OpenAi, "gpt-4o"), Tier::Pro)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert_eq!(*openai.calls.lock(), vec!["gpt-4o", "gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn test_subscription_tier_fails_fast() {
        let openai = ScriptedProvider::new(ProviderFamily::OpenAi, vec!["gpt-4o"]);
        let anthropic = ScriptedProvider::new(ProviderFamily::Anthropic, vec![]);
        let gateway = ProviderGateway::new(memory())
            .with_provider(openai.clone())
            .with_provider(anthropic.clone());

        let result = gateway
            .query("hi", &config(ProviderFamily::OpenAi, "gpt-4o"), Tier::Subscription)
            .await;
        assert!(result.is_err());
        assert_eq!(openai.calls.lock().len(), 1);
        assert!(anthropic.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_recent_failures_are_deprioritised() {
        let openai = ScriptedProvider::new(ProviderFamily::OpenAi, vec!["gpt-4o"]);
        let anthropic = ScriptedProvider::new(ProviderFamily::Anthropic, vec![]);
        let table = FallbackTable::empty().with_chain(
            "gpt-4o",
            vec![
                ModelChoice::new(ProviderFamily::Anthropic, "claude-sonnet-4"),
                ModelChoice::new(ProviderFamily::Anthropic, "claude-3-5-haiku"),
            ],
        );
        let memory = memory();
        memory.record_failure("claude-sonnet-4", "earlier outage");
        let gateway = ProviderGateway::new(memory)
            .with_provider(openai)
            .with_provider(anthropic)
            .with_fallback_table(table);

        let result = gateway
            .query("hi", &config(ProviderFamily::OpenAi, "gpt-4o"), Tier::Pro)
            .await
            .unwrap();
        assert_eq!(result.used.model, "claude-3-5-haiku");
    }

    #[test]
    fn test_model_availability_respects_tier() {
        let gateway = ProviderGateway::new(memory())
            .with_provider(ScriptedProvider::new(ProviderFamily::Anthropic, vec![]));
        let opus = ModelChoice::new(ProviderFamily::Anthropic, "claude-opus-4");
        assert!(gateway.is_model_available(&opus, Tier::Max));
        assert!(!gateway.is_model_available(&opus, Tier::Pro));
        let gpt = ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o");
        assert!(!gateway.is_model_available(&gpt, Tier::Max));
    }
}
