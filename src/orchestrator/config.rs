//! Debate templates loaded from YAML
//!
//! A template names the agent roster and the round policy so a debate can be
//! reproduced without code:
//!
//! ```yaml
//! name: laptop-review
//! rounds: 2
//! response_length: concise
//! auto_extra_round: 0.4
//! agents:
//!   - role: analyst
//!     provider: anthropic
//!     model: claude-sonnet-4
//!   - role: critic
//!     provider: google
//!     model: gemini-2.5-pro
//! ```

use super::debate::{ConsensusOptions, DebateConfig, DEFAULT_ROUNDS};
use super::disagreement::{DisagreementStrategy, LexicalDivergence, StanceVariance};
use crate::agent::AgentSpec;
use crate::catalog::ModelChoice;
use crate::error::{Error, Result};
use crate::types::{ResponseLength, Tier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Which disagreement heuristic a debate uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisagreementKind {
    /// [`LexicalDivergence`]
    #[default]
    Lexical,
    /// [`StanceVariance`] over the given labels
    Stance { labels: Vec<String> },
}

impl DisagreementKind {
    /// Instantiate the strategy
    pub fn build(&self) -> Arc<dyn DisagreementStrategy> {
        match self {
            DisagreementKind::Lexical => Arc::new(LexicalDivergence),
            DisagreementKind::Stance { labels } => Arc::new(StanceVariance::new(labels.clone())),
        }
    }
}

/// Serializable debate definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTemplate {
    /// Template name
    pub name: String,
    /// Participants
    pub agents: Vec<AgentSpec>,
    /// Configured rounds
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Response length mode
    #[serde(default)]
    pub response_length: ResponseLength,
    /// Force a second round when round 1 disagreement exceeds this
    #[serde(default)]
    pub auto_extra_round: Option<f64>,
    /// End remaining rounds when disagreement falls below this
    #[serde(default)]
    pub early_stop: Option<f64>,
    /// Disagreement heuristic
    #[serde(default)]
    pub disagreement: DisagreementKind,
    /// Synthesizer model; defaults to the synthesizer agent or the first agent
    #[serde(default)]
    pub synthesizer: Option<ModelChoice>,
    /// Baseline model answered alongside round 1
    #[serde(default)]
    pub comparison: Option<ModelChoice>,
    /// Consensus over final-round stances
    #[serde(default)]
    pub consensus: Option<ConsensusOptions>,
    /// Session wall clock in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_rounds() -> u32 {
    DEFAULT_ROUNDS
}

impl DebateTemplate {
    /// Load a template from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let template: Self = serde_yaml::from_str(yaml)?;
        template.check()?;
        Ok(template)
    }

    /// Load a template from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    fn check(&self) -> Result<()> {
        if let Some(agent) = self.agents.iter().find(|a| a.model.trim().is_empty()) {
            return Err(Error::validation(format!(
                "template {}: agent {} has no model",
                self.name, agent.role
            )));
        }
        if let Some(agent) = self
            .agents
            .iter()
            .find(|a| a.temperature.is_some_and(|t| !(0.0..=2.0).contains(&t)))
        {
            return Err(Error::validation(format!(
                "template {}: agent {} temperature outside 0.0..=2.0",
                self.name, agent.role
            )));
        }
        Ok(())
    }

    /// Debate configuration for `tier`; `default_timeout` applies when the
    /// template sets none
    pub fn to_config(&self, tier: Tier, default_timeout: Duration) -> DebateConfig {
        let mut config = DebateConfig::new(self.agents.clone())
            .with_rounds(self.rounds)
            .with_response_length(self.response_length)
            .with_tier(tier)
            .with_disagreement(self.disagreement.clone())
            .with_timeout(
                self.timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_timeout),
            );
        config.auto_extra_round = self.auto_extra_round;
        config.early_stop_below = self.early_stop;
        config.synthesizer = self.synthesizer.clone();
        config.comparison = self.comparison.clone();
        config.consensus = self.consensus.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;
    use crate::types::ProviderFamily;
    use std::io::Write;

    const TEMPLATE: &str = r#"
name: laptop-review
rounds: 1
response_length: concise
auto_extra_round: 0.4
disagreement:
  kind: stance
  labels: [yes, no]
agents:
  - role: analyst
    provider: anthropic
    model: claude-sonnet-4
  - role: critic
    provider: google
    model: gemini-2.5-pro
    persona: "You look for hidden costs."
  - role: synthesizer
    provider: openai
    model: gpt-4o
    enabled: false
comparison:
  provider: openai
  model: gpt-4o-mini
"#;

    #[test]
    fn test_parse_template() {
        let template = DebateTemplate::from_yaml(TEMPLATE).unwrap();
        assert_eq!(template.name, "laptop-review");
        assert_eq!(template.agents.len(), 3);
        assert_eq!(template.agents[1].role, Role::Critic);
        assert_eq!(template.agents[1].persona(), "You look for hidden costs.");
        assert!(!template.agents[2].enabled);
        assert_ne!(template.agents[0].id, template.agents[1].id);
        assert_eq!(
            template.disagreement,
            DisagreementKind::Stance { labels: vec!["yes".into(), "no".into()] }
        );

        let config = template.to_config(Tier::Pro, Duration::from_secs(90));
        assert_eq!(config.rounds, 1);
        assert_eq!(config.auto_extra_round, Some(0.4));
        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.comparison.as_ref().map(|c| c.provider), Some(ProviderFamily::OpenAi));
        assert_eq!(config.enabled_agents().count(), 2);
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
name: minimal
agents:
  - role: analyst
    provider: openai
    model: gpt-4o
  - role: specialist-2
    provider: groq
    model: llama-3.3-70b-versatile
"#;
        let template = DebateTemplate::from_yaml(yaml).unwrap();
        assert_eq!(template.rounds, DEFAULT_ROUNDS);
        assert_eq!(template.response_length, ResponseLength::Normal);
        assert_eq!(template.disagreement, DisagreementKind::Lexical);
        assert_eq!(template.agents[1].role, Role::Specialist(2));
    }

    #[test]
    fn test_rejects_bad_agents() {
        let yaml = r#"
name: broken
agents:
  - role: analyst
    provider: openai
    model: ""
"#;
        assert!(matches!(DebateTemplate::from_yaml(yaml), Err(Error::Validation(_))));

        let yaml = "name: broken\nagents:\n  - role: pundit\n    provider: openai\n    model: gpt-4o\n";
        assert!(matches!(DebateTemplate::from_yaml(yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEMPLATE.as_bytes()).unwrap();
        let template = DebateTemplate::from_file(file.path()).unwrap();
        assert_eq!(template.agents.len(), 3);
    }
}
