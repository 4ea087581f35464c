//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; binaries and tests call
//! [`init_tracing`] once to decide where they go.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "agora=info";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryFormat {
    /// Compact human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Install a global subscriber filtered by `RUST_LOG` (default `agora=info`).
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: TelemetryFormat) -> anyhow::Result<()> {
    let filter = env_filter();
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        TelemetryFormat::Text => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init()?,
        TelemetryFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?,
    }
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // whichever test installs first wins; the second call must error, not panic
        let _ = init_tracing(TelemetryFormat::Json);
        assert!(init_tracing(TelemetryFormat::Text).is_err());
    }

    #[test]
    fn test_format_serde() {
        let format: TelemetryFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, TelemetryFormat::Json);
        assert_eq!(TelemetryFormat::default(), TelemetryFormat::Text);
    }
}
