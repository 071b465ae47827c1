//! Global `tracing` subscriber setup.

use riposte_core::config::{GeneralConfig, TelemetryConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{GameError, Result};

/// Filter from `RUST_LOG` if set, otherwise from the configured level.
#[must_use]
pub fn filter(general: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: plain or JSON lines on stderr.
///
/// # Errors
///
/// Returns [`GameError::Logging`] if a global subscriber is already set.
pub fn init(general: &GeneralConfig, telemetry: &TelemetryConfig) -> Result<()> {
    let json = telemetry.json_logs;
    tracing_subscriber::registry()
        .with(filter(general))
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .try_init()
        .map_err(|e| GameError::Logging(e.to_string()))?;

    tracing::info!(level = %general.log_level, json, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        let general = GeneralConfig::default();
        let telemetry = TelemetryConfig::default();
        // Another test may have installed a subscriber first; either way the
        // second call in this process must fail cleanly.
        let _ = init(&general, &telemetry);
        assert!(matches!(init(&general, &telemetry), Err(GameError::Logging(_))));
    }
}
