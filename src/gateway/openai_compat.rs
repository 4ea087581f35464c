//! HTTP adapter for OpenAI-compatible chat-completions backends
//!
//! Every family in the catalog exposes an OpenAI-compatible endpoint, as do
//! OpenRouter and local vLLM servers, so one adapter parameterised by
//! [`ProviderEndpoint`] covers them all.

use crate::config::ProviderEndpoint;
use crate::error::{Error, Result};
use crate::provider::{ModelProvider, ModelResponse, QueryConfig, ToolCallRecord};
use crate::tools::{ToolContext, ToolSpec};
use crate::types::{ProviderFamily, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Chat-completions client for one backend
pub struct OpenAiCompatProvider {
    client: Client,
    endpoint: ProviderEndpoint,
}

impl OpenAiCompatProvider {
    /// Create a client for the given endpoint
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self> {
        let client = Client::builder().timeout(endpoint.timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Create a client from the family's environment variables
    pub fn from_env(family: ProviderFamily) -> Result<Self> {
        Self::new(ProviderEndpoint::from_env(family)?)
    }

    /// Get the endpoint
    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }

    /// Send a single completion request
    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!(
            "{}/chat/completions",
            self.endpoint.base_url.as_str().trim_end_matches('/')
        );

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = self.endpoint.api_key() {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::provider(
                self.endpoint.family.as_str(),
                &request.model,
                format!("Request failed with status {}: {}", status, error_text),
            ));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn query(&self, prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &config.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let registry = config
            .tools
            .as_ref()
            .filter(|tools| config.use_tools && !tools.is_empty());
        let definitions: Vec<ToolDefinition> = registry
            .map(|tools| tools.specs().into_iter().map(ToolDefinition::from).collect())
            .unwrap_or_default();
        let ctx = ToolContext::new(config.choice().to_string());

        let mut usage = TokenUsage::default();
        let mut records = Vec::new();

        // `max_steps` tool rounds, then one final call with tools withheld
        for step in 0..=config.max_steps {
            let advertise = registry.is_some() && step < config.max_steps;
            let mut request = CompletionRequest::new(&config.model, messages.clone())
                .with_temperature(config.temperature)
                .with_max_tokens(config.max_tokens);
            if advertise {
                request = request.with_tools(definitions.clone());
            }

            let response = self.complete(&request).await?;
            if let Some(step_usage) = response.usage {
                usage += TokenUsage::from(step_usage);
            }
            let Some(choice) = response.choices.into_iter().next() else {
                return Err(Error::provider(
                    self.endpoint.family.as_str(),
                    &config.model,
                    "response contained no choices",
                ));
            };

            let calls = choice.message.tool_calls.clone().unwrap_or_default();
            let tools = match registry {
                Some(tools) if advertise && !calls.is_empty() => tools,
                _ => {
                    let text = choice.message.content.unwrap_or_default();
                    return Ok(ModelResponse::text(text, usage).with_tool_calls(records));
                }
            };

            messages.push(choice.message);
            for call in calls {
                let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(serde_json::Value::String(call.function.arguments.clone()));
                let output = tools
                    .invoke(&call.function.name, arguments.clone(), &ctx)
                    .await;
                tracing::debug!(
                    model = %config.model,
                    tool = %call.function.name,
                    success = output.success,
                    step,
                    "tool call executed"
                );
                records.push(ToolCallRecord {
                    name: call.function.name.clone(),
                    arguments,
                    success: output.success,
                });
                messages.push(Message::tool(output.content, call.id));
            }
        }

        Err(Error::provider(
            self.endpoint.family.as_str(),
            &config.model,
            "tool loop ended without an answer",
        ))
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_configured()
    }

    fn family(&self) -> ProviderFamily {
        self.endpoint.family
    }

    fn client_type(&self) -> &str {
        "openai_compat"
    }
}

/// Completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Temperature for sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens for completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tools available to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            tools: None,
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content; absent on assistant messages that only call tools
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls (assistant messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call ID (tool messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content.into())
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content.into())
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content.into())
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool message
    Tool,
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Type of tool (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function details
    pub function: FunctionDefinition,
}

impl From<ToolSpec> for ToolDefinition {
    fn from(spec: ToolSpec) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: spec.name,
                description: spec.description,
                parameters: spec.parameters,
            },
        }
    }
}

/// Function definition for tool calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

/// Tool call from the assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call ID
    pub id: String,
    /// Type (always "function")
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    /// Function details
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Function arguments (JSON string)
    #[serde(default)]
    pub arguments: String,
}

/// Completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Unique identifier
    #[serde(default)]
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Choices
    pub choices: Vec<Choice>,
    /// Token usage; some local servers omit it
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Choice in completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of the choice
    #[serde(default)]
    pub index: u32,
    /// Message content
    pub message: Message,
    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelChoice;
    use crate::tools::{CalculatorTool, ToolRegistry};
    use mockito::Matcher;
    use std::sync::Arc;
    use url::Url;

    fn provider_for(server: &mockito::ServerGuard) -> OpenAiCompatProvider {
        let endpoint = ProviderEndpoint::new(ProviderFamily::OpenAi, None)
            .unwrap()
            .with_base_url(Url::parse(&server.url()).unwrap());
        OpenAiCompatProvider::new(endpoint).unwrap()
    }

    fn config() -> QueryConfig {
        QueryConfig::new(&ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o-mini"))
    }

    #[tokio::test]
    async fn test_plain_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"c1","model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"Hello"},"finish_reason":"stop"}],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#,
            )
            .create_async()
            .await;

        let provider = provider_for(&server);
        assert!(provider.is_configured());
        let response = provider.query("Hi", &config()).await.unwrap();
        assert_eq!(response.text, "Hello");
        assert_eq!(response.tokens, TokenUsage::new(7, 3));
        assert!(response.tool_calls.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = provider_for(&server).query("Hi", &config()).await.unwrap_err();
        match err {
            Error::Provider { message, .. } => assert!(message.contains("503")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_loop_feeds_results_back() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(r#""tools":\["#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"calculate","arguments":"{\"operation\":\"add\",\"a\":1,\"b\":2}"}}]}}],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(r#""role":"tool""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"The sum is 3"}}],"usage":{"prompt_tokens":20,"completion_tokens":4,"total_tokens":24}}"#,
            )
            .create_async()
            .await;

        let tools = Arc::new(ToolRegistry::new().register(Arc::new(CalculatorTool)));
        let response = provider_for(&server)
            .query("Add one and two", &config().with_tools(tools, 1))
            .await
            .unwrap();

        assert_eq!(response.text, "The sum is 3");
        assert_eq!(response.tokens, TokenUsage::new(30, 9));
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.tool_calls[0].success);
        first.assert_async().await;
        second.assert_async().await;
    }
}
