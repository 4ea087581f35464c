//! Engine settings and provider endpoint configuration

use crate::error::{Error, Result};
use crate::types::{ProviderFamily, Tier};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Top-level engine settings.
///
/// Loaded from built-in defaults, then an optional file, then `AGORA_*`
/// environment variables (nested keys use `__`, e.g.
/// `AGORA_RESEARCH__SPECIALISTS=6`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tier used when a request does not carry one
    pub default_tier: Tier,
    /// Wall-clock budget for one debate session, in seconds
    pub session_timeout_secs: u64,
    /// Debate defaults
    pub debate: DebateSettings,
    /// Research defaults
    pub research: ResearchSettings,
    /// Failure memory bounds
    pub fallback: FallbackSettings,
    /// Admission limiter
    pub admission: AdmissionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_tier: Tier::Pro,
            session_timeout_secs: 180,
            debate: DebateSettings::default(),
            research: ResearchSettings::default(),
            fallback: FallbackSettings::default(),
            admission: AdmissionSettings::default(),
        }
    }
}

/// Debate defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Configured rounds when the request does not say
    pub rounds: u32,
    /// Round-1 disagreement above which an extra round is forced
    pub disagreement_threshold: f64,
    /// Disagreement below which remaining rounds are skipped (0 disables)
    pub early_stop_threshold: f64,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            rounds: 2,
            disagreement_threshold: 0.35,
            early_stop_threshold: 0.0,
        }
    }
}

/// Research defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    /// Specialists launched per report
    pub specialists: usize,
    /// Tool-calling step bound per specialist
    pub max_steps: u32,
    /// Completion token ceiling per specialist
    pub max_tokens: u32,
    /// Maximum cached reports
    pub cache_capacity: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            specialists: 4,
            max_steps: 8,
            max_tokens: 2000,
            cache_capacity: 256,
        }
    }
}

/// Failure memory bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Maximum remembered failing models
    pub memory_capacity: usize,
    /// Seconds a failure is remembered
    pub memory_ttl_secs: u64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            memory_capacity: 128,
            memory_ttl_secs: 600,
        }
    }
}

/// Admission limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Sustained requests per minute
    pub requests_per_minute: u32,
    /// Burst size
    pub burst: u32,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst: 10,
        }
    }
}

impl EngineSettings {
    /// Load settings: defaults, then `path` (if any), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env if present so local development picks up AGORA_* overrides
        let _ = dotenv();

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix("AGORA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot run
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.debate.rounds) {
            return Err(Error::configuration("debate.rounds must be within 1..=5"));
        }
        if self.research.specialists == 0 {
            return Err(Error::configuration("research.specialists must be at least 1"));
        }
        if self.admission.requests_per_minute == 0 || self.admission.burst == 0 {
            return Err(Error::configuration("admission limits must be positive"));
        }
        Ok(())
    }

    /// Session wall-clock budget
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Failure memory TTL
    pub fn fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.fallback.memory_ttl_secs)
    }
}

/// Connection details for one OpenAI-compatible backend
#[derive(Clone)]
pub struct ProviderEndpoint {
    /// Family served
    pub family: ProviderFamily,
    /// API key; `None` for keyless local servers
    pub api_key: Option<SecretString>,
    /// Base URL ending before `/chat/completions`
    pub base_url: Url,
    /// Request timeout
    pub timeout: Duration,
}

impl ProviderEndpoint {
    /// Endpoint with the family's default base URL
    pub fn new(family: ProviderFamily, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            family,
            api_key: api_key.map(SecretString::from),
            base_url: parse_url(presets::base_url(family))?,
            timeout: Duration::from_secs(120),
        })
    }

    /// Endpoint from `<FAMILY>_API_KEY` and optional `<FAMILY>_BASE_URL`
    pub fn from_env(family: ProviderFamily) -> Result<Self> {
        let _ = dotenv();

        let api_key = std::env::var(presets::key_var(family)).ok().filter(|k| !k.is_empty());
        let mut endpoint = Self::new(family, api_key)?;
        if let Ok(base_url) = std::env::var(presets::base_url_var(family)) {
            endpoint.base_url = parse_url(&base_url)?;
        }
        Ok(endpoint)
    }

    /// Override the base URL
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the API key as a string
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }

    /// Keyless endpoints are only accepted on loopback hosts
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() || self.is_local()
    }

    fn is_local(&self) -> bool {
        matches!(
            self.base_url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]")
        )
    }
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("family", &self.family)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::configuration(format!("invalid base URL '{}': {}", raw, e)))
}

/// Default endpoints and environment variable names per family
pub mod presets {
    use crate::types::ProviderFamily;

    /// OpenAI-compatible base URL
    pub fn base_url(family: ProviderFamily) -> &'static str {
        match family {
            ProviderFamily::Anthropic => "https://api.anthropic.com/v1",
            ProviderFamily::OpenAi => "https://api.openai.com/v1",
            ProviderFamily::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderFamily::Groq => "https://api.groq.com/openai/v1",
            ProviderFamily::Mistral => "https://api.mistral.ai/v1",
            ProviderFamily::DeepSeek => "https://api.deepseek.com/v1",
            ProviderFamily::Xai => "https://api.x.ai/v1",
        }
    }

    /// Environment variable holding the API key
    pub fn key_var(family: ProviderFamily) -> &'static str {
        match family {
            ProviderFamily::Anthropic => "ANTHROPIC_API_KEY",
            ProviderFamily::OpenAi => "OPENAI_API_KEY",
            ProviderFamily::Google => "GOOGLE_API_KEY",
            ProviderFamily::Groq => "GROQ_API_KEY",
            ProviderFamily::Mistral => "MISTRAL_API_KEY",
            ProviderFamily::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderFamily::Xai => "XAI_API_KEY",
        }
    }

    /// Environment variable overriding the base URL
    pub fn base_url_var(family: ProviderFamily) -> &'static str {
        match family {
            ProviderFamily::Anthropic => "ANTHROPIC_BASE_URL",
            ProviderFamily::OpenAi => "OPENAI_BASE_URL",
            ProviderFamily::Google => "GOOGLE_BASE_URL",
            ProviderFamily::Groq => "GROQ_BASE_URL",
            ProviderFamily::Mistral => "MISTRAL_BASE_URL",
            ProviderFamily::DeepSeek => "DEEPSEEK_BASE_URL",
            ProviderFamily::Xai => "XAI_BASE_URL",
        }
    }
}
