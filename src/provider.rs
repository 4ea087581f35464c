//! Uniform call contract implemented by every model backend

use crate::catalog::ModelChoice;
use crate::error::Result;
use crate::tools::ToolRegistry;
use crate::types::{ProviderFamily, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-call configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Model identifier
    pub model: String,
    /// Provider family serving the model
    pub provider: ProviderFamily,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token ceiling
    pub max_tokens: u32,
    /// Advertise tools to the model
    pub use_tools: bool,
    /// Maximum tool-calling steps before the answer is forced
    pub max_steps: u32,
    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tools available when `use_tools` is set
    #[serde(skip)]
    pub tools: Option<Arc<ToolRegistry>>,
}

impl QueryConfig {
    /// Create a configuration for a model with conservative defaults
    pub fn new(choice: &ModelChoice) -> Self {
        Self {
            model: choice.model.clone(),
            provider: choice.provider,
            temperature: 0.7,
            max_tokens: 1000,
            use_tools: false,
            max_steps: 1,
            system: None,
            tools: None,
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token ceiling
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Enable tool use with the given registry and step bound
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>, max_steps: u32) -> Self {
        self.use_tools = true;
        self.max_steps = max_steps.max(1);
        self.tools = Some(tools);
        self
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// The same call retargeted at another model
    pub fn retarget(&self, choice: &ModelChoice) -> Self {
        let mut config = self.clone();
        config.model = choice.model.clone();
        config.provider = choice.provider;
        config
    }

    /// The (provider, model) pair this config targets
    pub fn choice(&self) -> ModelChoice {
        ModelChoice::new(self.provider, self.model.clone())
    }
}

impl std::fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryConfig")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("use_tools", &self.use_tools)
            .field("max_steps", &self.max_steps)
            .field("tools", &self.tools.as_ref().map(|t| t.len()))
            .finish()
    }
}

/// One tool invocation made while answering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name
    pub name: String,
    /// Arguments as sent by the model
    pub arguments: serde_json::Value,
    /// Whether the tool succeeded
    pub success: bool,
}

/// Response from a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Final text
    pub text: String,
    /// Token usage across all steps
    pub tokens: TokenUsage,
    /// Tool calls made while answering
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Backend-reported error for responses that arrived but are unusable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelResponse {
    /// A plain text response
    pub fn text(text: impl Into<String>, tokens: TokenUsage) -> Self {
        Self {
            text: text.into(),
            tokens,
            tool_calls: Vec::new(),
            error: None,
        }
    }

    /// Attach tool call records
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Distinct tool names in first-use order
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for call in &self.tool_calls {
            if !names.contains(&call.name) {
                names.push(call.name.clone());
            }
        }
        names
    }
}

/// Unified trait for model backends (HTTP API, local server, subprocess)
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send one logical query, including any tool-calling steps
    async fn query(&self, prompt: &str, config: &QueryConfig) -> Result<ModelResponse>;

    /// Whether credentials/endpoint are present
    fn is_configured(&self) -> bool;

    /// Provider family served by this backend
    fn family(&self) -> ProviderFamily;

    /// Backend kind for debugging/logging
    fn client_type(&self) -> &str;
}
