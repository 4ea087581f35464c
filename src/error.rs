//! Error types for the Agora engine

use thiserror::Error;

/// Result type alias for Agora operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Agora engine
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, rejected before any external call
    #[error("Validation error: {0}")]
    Validation(String),

    /// No usable model or provider for a role/tier
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend call failed (after any fallback hop)
    #[error("Provider error ({provider}/{model}): {message}")]
    Provider {
        provider: String,
        model: String,
        message: String,
    },

    /// Model output could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Session wall clock exceeded
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Caller aborted the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Admission limiter rejected the request
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Tool execution error
    #[error("Tool execution error: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML template error
    #[error("Template error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Settings loading error
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a provider error
    pub fn provider(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a tool execution error
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error ends a whole session rather than a single entity.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Configuration(_)
                | Self::Timeout(_)
                | Self::Cancelled(_)
                | Self::RateLimitExceeded(_)
        )
    }

    /// Whether the caller should be told that retrying may succeed.
    pub fn retry_suggested(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimitExceeded(_) | Self::Provider { .. } | Self::Http(_)
        )
    }

    /// Short machine-readable kind, used in session error records and events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Provider { .. } => "provider",
            Self::Parse(_) => "parse",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::RateLimitExceeded(_) => "rate_limited",
            Self::ToolExecution { .. } => "tool",
            Self::Http(_) => "http",
            Self::Serialization(_) | Self::Yaml(_) => "serialization",
            Self::Settings(_) => "settings",
            Self::Io(_) => "io",
        }
    }
}
