//! Configuration for the Riposte core.
//!
//! Maps directly to `riposte.toml`. Every field has a serde default so a
//! partial file only overrides what it names.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiposteError};

/// Top-level Riposte configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiposteConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Parry window timing and mitigation.
    #[serde(default)]
    pub parry: ParryConfig,
    /// Event aggregation batching.
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// SQLite settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Analytics record delivery.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RiposteConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| RiposteError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.parry.validate()?;
        if self.aggregation.batch_size == 0 {
            return Err(RiposteError::Config("aggregation.batch_size must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Parry window timing, mitigation and counterattack tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParryConfig {
    /// How long a window stays ACTIVE after activation.
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,
    /// Reactions at or under this are PERFECT (full negation).
    #[serde(default = "default_perfect_threshold_ms")]
    pub perfect_threshold_ms: i64,
    /// Fraction of damage negated by a standard (non-perfect) parry.
    #[serde(default = "default_standard_negation")]
    pub standard_negation: f64,
    /// Bonus window for counterattacks, measured from the parry instant.
    #[serde(default = "default_counter_window_ms")]
    pub counter_window_ms: i64,
    /// Counter damage multiplier after a standard parry.
    #[serde(default = "default_counter_multiplier")]
    pub counter_multiplier: f64,
    /// Counter damage multiplier after a perfect parry.
    #[serde(default = "default_perfect_counter_multiplier")]
    pub perfect_counter_multiplier: f64,
}

impl Default for ParryConfig {
    fn default() -> Self {
        Self {
            window_ms: 2500,
            perfect_threshold_ms: 300,
            standard_negation: 0.75,
            counter_window_ms: 1000,
            counter_multiplier: 1.5,
            perfect_counter_multiplier: 2.0,
        }
    }
}

impl ParryConfig {
    /// Check timing and ratio constraints.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.perfect_threshold_ms <= 0 || self.perfect_threshold_ms > self.window_ms {
            return Err(RiposteError::Config(format!(
                "parry.perfect_threshold_ms ({}) must be in 1..=window_ms ({})",
                self.perfect_threshold_ms, self.window_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.standard_negation) {
            return Err(RiposteError::Config(format!(
                "parry.standard_negation ({}) must be within [0, 1]",
                self.standard_negation
            )));
        }
        if self.counter_window_ms < 0 {
            return Err(RiposteError::Config("parry.counter_window_ms must not be negative".into()));
        }
        if self.counter_multiplier < 1.0 || self.perfect_counter_multiplier < 1.0 {
            return Err(RiposteError::Config("parry counter multipliers must be >= 1.0".into()));
        }
        Ok(())
    }
}

/// Event aggregation batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Maximum events claimed per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Processed events older than this are eligible for purge. 0 keeps forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interval between worker ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            retention_days: 30,
            interval_ms: 5000,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode so readers never block the writer.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// How long a connection waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Number of rotating backups to keep.
    #[serde(default = "default_3")]
    pub backup_count: u32,
    /// Seconds between rotating backups taken by the progression worker.
    /// 0 disables periodic backups.
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
            backup_count: 3,
            backup_interval_secs: 3600,
        }
    }
}

/// Telemetry delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether analytics records are produced at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sink: "tracing", "memory", "none".
    #[serde(default = "default_sink")]
    pub sink: String,
    /// Format log output as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: "tracing".to_string(),
            json_logs: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_sink() -> String { "tracing".to_string() }
fn default_backup_interval_secs() -> u64 { 3600 }
fn default_window_ms() -> i64 { 2500 }
fn default_perfect_threshold_ms() -> i64 { 300 }
fn default_standard_negation() -> f64 { 0.75 }
fn default_counter_window_ms() -> i64 { 1000 }
fn default_counter_multiplier() -> f64 { 1.5 }
fn default_perfect_counter_multiplier() -> f64 { 2.0 }
fn default_batch_size() -> usize { 500 }
fn default_retention_days() -> u32 { 30 }
fn default_interval_ms() -> u64 { 5000 }
fn default_busy_timeout_ms() -> u64 { 5000 }
fn default_3() -> u32 { 3 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tuning() {
        let config = RiposteConfig::default();
        assert_eq!(config.parry.window_ms, 2500);
        assert_eq!(config.parry.perfect_threshold_ms, 300);
        assert!((config.parry.standard_negation - 0.75).abs() < f64::EPSILON);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = RiposteConfig::from_toml(
            r#"
            [parry]
            window_ms = 3000

            [aggregation]
            batch_size = 50
            "#,
        )
        .expect("parse");
        assert_eq!(config.parry.window_ms, 3000);
        assert_eq!(config.parry.perfect_threshold_ms, 300);
        assert_eq!(config.aggregation.batch_size, 50);
        assert!(config.persistence.wal_mode);
    }

    #[test]
    fn persistence_backup_interval_parses_and_defaults() {
        let config = RiposteConfig::from_toml(
            r#"
            [general]
            enabled = true
            log_level = "warn"

            [persistence]
            backup_count = 2
            "#,
        )
        .expect("parse");
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.persistence.backup_count, 2);
        assert_eq!(config.persistence.backup_interval_secs, 3600);

        let off = RiposteConfig::from_toml("[persistence]\nbackup_interval_secs = 0").expect("parse");
        assert_eq!(off.persistence.backup_interval_secs, 0);
    }

    #[test]
    fn threshold_above_window_is_rejected() {
        let err = RiposteConfig::from_toml(
            r#"
            [parry]
            window_ms = 200
            perfect_threshold_ms = 300
            "#,
        )
        .expect_err("invalid");
        assert!(matches!(err, RiposteError::Config(_)));
    }

    #[test]
    fn negation_out_of_range_is_rejected() {
        let parry = ParryConfig {
            standard_negation: 1.5,
            ..ParryConfig::default()
        };
        assert!(parry.validate().is_err());
    }

    #[test]
    fn garbage_toml_is_config_error() {
        assert!(matches!(
            RiposteConfig::from_toml("parry = ["),
            Err(RiposteError::Config(_))
        ));
    }
}
