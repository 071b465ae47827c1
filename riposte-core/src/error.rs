//! Error types for the Riposte core library.

use thiserror::Error;

use crate::types::{TargetId, UserId, WindowId};

/// Top-level error type for all Riposte operations.
#[derive(Error, Debug)]
pub enum RiposteError {
    /// The request was rejected before anything was written.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// SQLite persistence error. The enclosing unit of work was rolled back.
    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// An event's context could not be decoded for its kind.
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RiposteError {
    /// Whether the whole call can be retried as-is.
    ///
    /// Only transient storage contention qualifies; validation failures will
    /// fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RiposteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Input rejected by the parry engine or the event dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The attack arrived before the window opened.
    #[error("attack at {reaction_ms}ms relative to activation precedes the window")]
    NegativeReactionTime {
        /// Signed reaction time in milliseconds (always negative here).
        reaction_ms: i64,
    },

    /// The user has no window in the ACTIVE state.
    #[error("no active parry window for user {0}")]
    NoActiveWindow(UserId),

    /// No window row exists with this id.
    #[error("parry window {0} not found")]
    WindowNotFound(WindowId),

    /// The window already reached a terminal status.
    #[error("parry window {id} is already {status}")]
    WindowTerminal {
        /// The window.
        id: WindowId,
        /// Its terminal status name.
        status: String,
    },

    /// The attack came from a target the window was not raised against.
    #[error("window {window} guards target {expected}, attack came from {actual}")]
    TargetMismatch {
        /// The active window.
        window: WindowId,
        /// Target recorded at activation.
        expected: TargetId,
        /// Target named in the resolve call.
        actual: TargetId,
    },

    /// Incoming damage must be finite and non-negative.
    #[error("invalid damage value {0}")]
    InvalidDamage(f64),

    /// Counterattacks need a window that ended in SUCCESS or PERFECT.
    #[error("parry window {id} cannot be countered from status {status}")]
    NotCounterable {
        /// The window.
        id: WindowId,
        /// Its current status name.
        status: String,
    },

    /// The counter timestamp precedes the parry that enabled it.
    #[error("counterattack on window {0} precedes its resolution")]
    CounterBeforeResolution(WindowId),

    /// Event magnitude must be finite.
    #[error("invalid event magnitude {0}")]
    InvalidMagnitude(f64),

    /// Custom event kinds need a non-empty name.
    #[error("event kind name is empty")]
    EmptyEventKind,
}

/// A gameplay event whose context does not fit its kind.
///
/// Never escapes the aggregator: the event is consumed with zero deltas and
/// the error is logged and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    /// The stored context is not a JSON object.
    #[error("event {event} context is not a JSON object")]
    NotAnObject {
        /// Offending event id.
        event: i64,
    },

    /// A known key carries the wrong JSON type.
    #[error("event {event} field `{field}` expected {expected}")]
    FieldType {
        /// Offending event id.
        event: i64,
        /// Key inside the context.
        field: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },

    /// The stored context could not be parsed at all.
    #[error("event {event} context is not valid JSON: {reason}")]
    Unparseable {
        /// Offending event id.
        event: i64,
        /// Parser message.
        reason: String,
    },
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, RiposteError>;
