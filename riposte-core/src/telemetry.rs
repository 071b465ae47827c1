//! Structured analytics records for parry transitions and achievement unlocks.
//!
//! Records are produced inside a unit of work and handed to the sink only
//! after the transaction commits, so a rolled-back transition never shows up
//! in analytics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::TelemetryConfig;
use crate::types::UserId;

/// One analytics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Acting user.
    pub user: UserId,
    /// e.g. `parry_perfect`, `achievement_unlocked`.
    pub event_type: String,
    /// Combat/session correlation id (window id, or `achievement:tier`).
    pub correlation_id: String,
    /// Reaction time in milliseconds, when the record concerns a parry.
    pub reaction_ms: Option<i64>,
    /// Damage figure relevant to the record (avoided or taken).
    pub damage: Option<f64>,
    /// Damage multiplier, for counterattacks.
    pub multiplier: Option<f64>,
    /// Free-form extra fields.
    pub metadata: Map<String, Value>,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Start a record with no numeric fields.
    #[must_use]
    pub fn new(
        user: UserId,
        event_type: impl Into<String>,
        correlation_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user,
            event_type: event_type.into(),
            correlation_id: correlation_id.into(),
            reaction_ms: None,
            damage: None,
            multiplier: None,
            metadata: Map::new(),
            timestamp,
        }
    }

    /// Attach a reaction time.
    #[must_use]
    pub fn with_reaction_ms(mut self, ms: i64) -> Self {
        self.reaction_ms = Some(ms);
        self
    }

    /// Attach a damage figure.
    #[must_use]
    pub fn with_damage(mut self, damage: f64) -> Self {
        self.damage = Some(damage);
        self
    }

    /// Attach a multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Attach one metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for committed telemetry records.
pub trait TelemetrySink: Send + Sync {
    /// Deliver one committed record. Must not fail the caller.
    fn record(&self, record: &TelemetryRecord);
}

/// Emits each record as a structured `tracing` event under
/// `riposte::telemetry`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: &TelemetryRecord) {
        let metadata = Value::Object(record.metadata.clone());
        info!(
            target: "riposte::telemetry",
            user = %record.user,
            event_type = %record.event_type,
            correlation_id = %record.correlation_id,
            reaction_ms = record.reaction_ms,
            damage = record.damage,
            multiplier = record.multiplier,
            metadata = %metadata,
            timestamp = %record.timestamp.to_rfc3339(),
            "telemetry"
        );
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().clone()
    }

    /// Records with the given `event_type`.
    #[must_use]
    pub fn of_type(&self, event_type: &str) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Drain and return everything recorded so far.
    pub fn take(&self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, record: &TelemetryRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _record: &TelemetryRecord) {}
}

/// Build the sink named by configuration. Unknown names fall back to tracing.
#[must_use]
pub fn sink_from_config(config: &TelemetryConfig) -> std::sync::Arc<dyn TelemetrySink> {
    if !config.enabled {
        return std::sync::Arc::new(NullSink);
    }
    match config.sink.as_str() {
        "none" => std::sync::Arc::new(NullSink),
        "memory" => std::sync::Arc::new(MemorySink::new()),
        "tracing" => std::sync::Arc::new(TracingSink),
        other => {
            tracing::warn!(sink = %other, "Unknown telemetry sink, using tracing");
            std::sync::Arc::new(TracingSink)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_numeric_fields() {
        let rec = TelemetryRecord::new(UserId(1), "parry_success", "w-1", Utc::now())
            .with_reaction_ms(420)
            .with_damage(75.0)
            .with_meta("target", 9);
        assert_eq!(rec.reaction_ms, Some(420));
        assert_eq!(rec.damage, Some(75.0));
        assert_eq!(rec.metadata.get("target"), Some(&Value::from(9)));
        assert!(rec.multiplier.is_none());
    }

    #[test]
    fn memory_sink_filters_by_type() {
        let sink = MemorySink::new();
        sink.record(&TelemetryRecord::new(UserId(1), "parry_perfect", "a", Utc::now()));
        sink.record(&TelemetryRecord::new(UserId(1), "parry_failed", "b", Utc::now()));
        assert_eq!(sink.of_type("parry_failed").len(), 1);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn record_serializes_to_json() {
        let rec = TelemetryRecord::new(UserId(5), "achievement_unlocked", "parry_master:1", Utc::now());
        let json = serde_json::to_value(&rec).expect("serialize");
        assert_eq!(json["event_type"], "achievement_unlocked");
        assert_eq!(json["user"], 5);
    }
}
