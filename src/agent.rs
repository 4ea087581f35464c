//! Agent roles, persona templates and agent specifications

use crate::catalog::ModelChoice;
use crate::error::{Error, Result};
use crate::provider::QueryConfig;
use crate::types::{AgentId, ProviderFamily, ResponseLength};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Functional slot an agent fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// Builds the initial case
    Analyst,
    /// Attacks weak points
    Critic,
    /// Reconciles positions
    Synthesizer,
    /// Resolves ties and dissent
    Judge,
    /// Numbered research specialist (1-based)
    Specialist(u8),
}

impl Role {
    /// Persona template used as the system prompt
    pub fn persona(&self) -> &'static str {
        match self {
            Role::Analyst => {
                "You are a rigorous analyst. Build the strongest evidence-based answer to the \
                 question, state your assumptions, and commit to a clear position."
            }
            Role::Critic => {
                "You are a sceptical critic. Identify weak evidence, hidden assumptions and \
                 overlooked alternatives in the other answers, then give your own position."
            }
            Role::Synthesizer => {
                "You are a synthesizer. Find common ground between the other answers, resolve \
                 contradictions where the evidence allows, and state a combined position."
            }
            Role::Judge => {
                "You are an impartial judge. Weigh the arguments on their merits, not on how \
                 many agents made them, and deliver a final decision with a confidence."
            }
            Role::Specialist(_) => {
                "You are a research specialist. Use the available tools to gather facts \
                 before answering, and report concrete findings with their sources."
            }
        }
    }

    /// Whether this role runs tool-augmented calls
    pub fn needs_tools(&self) -> bool {
        matches!(self, Role::Specialist(_))
    }

    /// Default sampling temperature for the role
    pub fn default_temperature(&self) -> f32 {
        match self {
            Role::Analyst | Role::Specialist(_) => 0.4,
            Role::Critic => 0.7,
            Role::Synthesizer => 0.5,
            Role::Judge => 0.2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Analyst => f.write_str("analyst"),
            Role::Critic => f.write_str("critic"),
            Role::Synthesizer => f.write_str("synthesizer"),
            Role::Judge => f.write_str("judge"),
            Role::Specialist(n) => write!(f, "specialist-{}", n),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyst" => Ok(Role::Analyst),
            "critic" => Ok(Role::Critic),
            "synthesizer" | "synthesiser" => Ok(Role::Synthesizer),
            "judge" => Ok(Role::Judge),
            other => other
                .strip_prefix("specialist-")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n > 0)
                .map(Role::Specialist)
                .ok_or_else(|| Error::validation(format!("unknown role '{}'", s))),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.to_string()
    }
}

/// One configured participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique identifier
    #[serde(default)]
    pub id: AgentId,
    /// Role slot
    pub role: Role,
    /// Provider family
    pub provider: ProviderFamily,
    /// Model identifier
    pub model: String,
    /// Persona override; the role's template is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Disabled agents are skipped by the debate engine
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_enabled() -> bool {
    true
}

impl AgentSpec {
    /// Create a new agent spec builder
    pub fn builder() -> AgentSpecBuilder {
        AgentSpecBuilder::default()
    }

    /// Spec for a role on a concrete model with defaults
    pub fn new(role: Role, choice: &ModelChoice) -> Self {
        Self {
            id: AgentId::new(),
            role,
            provider: choice.provider,
            model: choice.model.clone(),
            persona: None,
            enabled: true,
            temperature: None,
        }
    }

    /// The (provider, model) pair
    pub fn choice(&self) -> ModelChoice {
        ModelChoice::new(self.provider, self.model.clone())
    }

    /// Persona in effect
    pub fn persona(&self) -> &str {
        self.persona.as_deref().unwrap_or_else(|| self.role.persona())
    }

    /// Call configuration for one debate turn
    pub fn query_config(&self, length: ResponseLength) -> QueryConfig {
        QueryConfig::new(&self.choice())
            .with_temperature(self.temperature.unwrap_or_else(|| self.role.default_temperature()))
            .with_max_tokens(length.max_tokens())
            .with_system(self.persona())
    }

    /// Display label, e.g. `critic (google/gemini-2.5-pro)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.role, self.choice())
    }
}

/// Agent spec builder
#[derive(Debug, Default)]
pub struct AgentSpecBuilder {
    role: Option<Role>,
    provider: Option<ProviderFamily>,
    model: Option<String>,
    persona: Option<String>,
    enabled: Option<bool>,
    temperature: Option<f32>,
}

impl AgentSpecBuilder {
    /// Set the role
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Set provider and model together
    pub fn model(mut self, choice: ModelChoice) -> Self {
        self.provider = Some(choice.provider);
        self.model = Some(choice.model);
        self
    }

    /// Override the persona template
    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Enable or disable the agent
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Build the agent spec
    pub fn build(self) -> Result<AgentSpec> {
        let role = self.role.ok_or_else(|| Error::validation("Agent role is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| Error::validation("Agent provider is required"))?;
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| Error::validation("Agent model is required"))?;
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::validation(format!("temperature {} outside 0.0..=2.0", t)));
            }
        }

        Ok(AgentSpec {
            id: AgentId::new(),
            role,
            provider,
            model,
            persona: self.persona,
            enabled: self.enabled.unwrap_or(true),
            temperature: self.temperature,
        })
    }
}
