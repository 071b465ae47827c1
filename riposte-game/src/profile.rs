//! Deployment profiles: named presets over [`RiposteConfig`].

use std::fmt;
use std::str::FromStr;

use riposte_core::config::RiposteConfig;

use crate::error::GameError;

/// Where the service is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentProfile {
    /// Local iteration: verbose logs, quick worker ticks, one backup.
    #[default]
    Development,
    /// Live shards: JSON logs, larger batches, more backups.
    Production,
    /// Soak and load tests: telemetry off, big batches, fast ticks.
    LoadTest,
}

impl DeploymentProfile {
    /// Get a human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Development => "Development: debug logs, 1s ticks",
            Self::Production => "Production: JSON logs, 5s ticks, 5 backups",
            Self::LoadTest => "Load test: no telemetry, 250ms ticks, 5000-event batches",
        }
    }

    /// The preset configuration for this profile.
    #[must_use]
    pub fn config(self) -> RiposteConfig {
        let mut config = RiposteConfig::default();
        match self {
            Self::Development => {
                config.general.log_level = "debug".into();
                config.aggregation.batch_size = 100;
                config.aggregation.interval_ms = 1000;
                config.persistence.backup_count = 1;
            }
            Self::Production => {
                config.telemetry.json_logs = true;
                config.aggregation.batch_size = 500;
                config.aggregation.interval_ms = 5000;
                config.persistence.backup_count = 5;
            }
            Self::LoadTest => {
                config.general.log_level = "warn".into();
                config.telemetry.sink = "none".into();
                config.aggregation.batch_size = 5000;
                config.aggregation.interval_ms = 250;
                config.aggregation.retention_days = 1;
                config.persistence.backup_count = 0;
            }
        }
        config
    }
}

impl FromStr for DeploymentProfile {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "prod" | "production" => Ok(Self::Production),
            "load" | "loadtest" | "load_test" | "load-test" => Ok(Self::LoadTest),
            other => Err(GameError::UnknownProfile(other.to_string())),
        }
    }
}

impl fmt::Display for DeploymentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::LoadTest => "load_test",
        })
    }
}
