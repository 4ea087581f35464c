//! Specialist focus areas and their prompts

use crate::types::Timeframe;
use serde::{Deserialize, Serialize};

/// What a specialist investigates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Focus {
    Background,
    RecentDevelopments,
    Quantitative,
    Risks,
}

impl Focus {
    /// Focus areas assigned in order; larger teams wrap around
    pub const ROTATION: [Focus; 4] = [
        Focus::Background,
        Focus::RecentDevelopments,
        Focus::Quantitative,
        Focus::Risks,
    ];

    /// Focus for the `index`-th specialist (0-based)
    pub fn for_index(index: usize) -> Self {
        Self::ROTATION[index % Self::ROTATION.len()]
    }

    fn brief(&self) -> &'static str {
        match self {
            Focus::Background => {
                "Establish what the subject is, how it got here and who the key actors are."
            }
            Focus::RecentDevelopments => {
                "Find what changed within the timeframe: announcements, releases, events."
            }
            Focus::Quantitative => {
                "Collect the numbers. Compute ratios and changes with the calculate tool \
                 rather than estimating them."
            }
            Focus::Risks => {
                "Look for risks, open problems and evidence against the prevailing view."
            }
        }
    }
}

/// System prompt for one specialist
pub fn system_prompt(focus: Focus) -> String {
    format!(
        "You are a research specialist ({focus:?}). {brief}\n\
         The briefing you receive is deliberately thin. Call lookup_context with \
         section \"index\" to see what material exists, then read the sections that \
         matter for your focus. Report concrete findings only; say so when the \
         material does not cover something.",
        focus = focus,
        brief = focus.brief()
    )
}

/// User prompt carrying the shared seed
pub fn task_prompt(seed: &str, timeframe: Timeframe) -> String {
    format!(
        "{seed}\n\nInvestigate this subject over the {tf} timeframe and report your \
         findings as a short list of bullet points followed by a one-line summary.",
        seed = seed,
        tf = timeframe.as_str()
    )
}

/// Prompt for the cheap existence check that precedes a report
pub fn fact_check_prompt(subject: &str, overview: Option<&str>) -> String {
    let overview = overview
        .map(|o| format!("\nAvailable overview: {}", o))
        .unwrap_or_default();
    format!(
        "Does the subject \"{subject}\" refer to a real, identifiable entity or topic?{overview}\n\
         Reply with JSON only: {{\"exists\": true|false, \"name\": \"canonical name\", \
         \"summary\": \"one sentence\"}}"
    )
}
