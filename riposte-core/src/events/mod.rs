//! Event log and dispatcher: the append-only record of gameplay facts.
//!
//! Upstream systems (combat, crafting, economy, the parry engine itself)
//! report facts here and nowhere else. Rows are immutable except for the
//! `processed` flag, which flips false→true exactly once when the aggregator
//! claims the event.
//!
//! `read_unprocessed` is a plain snapshot: the same event may come back on
//! repeated calls until it is claimed. Consumers rely on the claim, not on
//! the read, for exactly-once effects.

pub mod kind;
pub mod payload;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AggregationError, Result, ValidationError};
use crate::store::{Store, UnitOfWork};
use crate::types::{EventId, UserId, from_millis, to_millis};

pub use kind::EventKind;
pub use payload::EventPayload;

/// A stored gameplay fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Log position.
    pub id: EventId,
    /// What happened.
    pub kind: EventKind,
    /// Who it happened to.
    pub user: UserId,
    /// Amount (damage, gold, count...). Meaning depends on kind.
    pub magnitude: f64,
    /// Context object as stored (JSON text).
    pub context: String,
    /// When the fact was reported.
    pub created_at: DateTime<Utc>,
    /// Whether the aggregator has consumed it.
    pub processed: bool,
}

impl GameEvent {
    /// Parse the stored context into a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] if the text is not JSON or not an object.
    pub fn context(&self) -> std::result::Result<Map<String, Value>, AggregationError> {
        match serde_json::from_str::<Value>(&self.context) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(AggregationError::NotAnObject { event: self.id.0 }),
            Err(e) => Err(AggregationError::Unparseable {
                event: self.id.0,
                reason: e.to_string(),
            }),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(1)?;
        Ok(Self {
            id: row.get(0)?,
            kind: EventKind::parse(&kind),
            user: row.get(2)?,
            magnitude: row.get(3)?,
            context: row.get(4)?,
            created_at: from_millis(row.get(5)?)?,
            processed: row.get(6)?,
        })
    }
}

/// A fact about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// What happened.
    pub kind: EventKind,
    /// Who it happened to.
    pub user: UserId,
    /// Amount; must be finite.
    pub magnitude: f64,
    /// Free-form context object.
    pub context: Map<String, Value>,
    /// Report time.
    pub at: DateTime<Utc>,
}

impl NewEvent {
    /// A fact with empty context, stamped now.
    #[must_use]
    pub fn new(kind: EventKind, user: UserId, magnitude: f64) -> Self {
        Self {
            kind,
            user,
            magnitude,
            context: Map::new(),
            at: Utc::now(),
        }
    }

    /// Add one context entry.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Override the report time.
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.magnitude.is_finite() {
            return Err(ValidationError::InvalidMagnitude(self.magnitude).into());
        }
        if self.kind.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyEventKind.into());
        }
        Ok(())
    }
}

const SELECT_EVENT: &str =
    "SELECT id, kind, user_id, magnitude, context, created_at, processed FROM game_events";

/// Write path into the event log, plus the queries the aggregator needs.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    store: Arc<Store>,
}

impl EventDispatcher {
    /// Build a dispatcher over `store`.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append `event` inside the caller's unit of work.
    ///
    /// The row becomes visible only if the caller commits.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-finite magnitude or an empty kind,
    /// or a persistence error if the insert fails.
    pub fn log_in(uow: &mut UnitOfWork<'_>, event: &NewEvent) -> Result<EventId> {
        event.validate()?;
        let context = Value::Object(event.context.clone()).to_string();
        uow.conn().execute(
            "INSERT INTO game_events (kind, user_id, magnitude, context, created_at, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                event.kind.as_str(),
                event.user,
                event.magnitude,
                context,
                to_millis(event.at)
            ],
        )?;
        let id = EventId(uow.conn().last_insert_rowid());
        uow.count(|c| &c.events_logged, 1);
        debug!(event = %id, kind = %event.kind, user = %event.user, "Event logged");
        Ok(id)
    }

    /// Append one fact as its own durable write.
    ///
    /// # Errors
    ///
    /// As [`EventDispatcher::log_in`]; nothing is written on error.
    pub fn log(
        &self,
        kind: EventKind,
        user: UserId,
        magnitude: f64,
        context: Map<String, Value>,
    ) -> Result<EventId> {
        let event = NewEvent {
            kind,
            user,
            magnitude,
            context,
            at: Utc::now(),
        };
        self.store.transaction(|uow| Self::log_in(uow, &event))
    }

    /// Append a prepared fact as its own durable write.
    ///
    /// # Errors
    ///
    /// As [`EventDispatcher::log_in`].
    pub fn log_event(&self, event: &NewEvent) -> Result<EventId> {
        self.store.transaction(|uow| Self::log_in(uow, event))
    }

    /// Oldest-first snapshot of up to `limit` unconsumed events.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn read_unprocessed(&self, limit: usize) -> Result<Vec<GameEvent>> {
        self.store.read(|conn| unprocessed(conn, limit))
    }

    /// Flip `processed` on one event. Returns `true` only for the call that
    /// actually flipped it; repeats are no-ops.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the update fails.
    pub fn mark_processed(&self, id: EventId) -> Result<bool> {
        self.store.transaction(|uow| Self::claim(uow, id, Utc::now()))
    }

    /// Conditional claim used by the aggregator inside its batch transaction.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the update fails.
    pub fn claim(uow: &mut UnitOfWork<'_>, id: EventId, at: DateTime<Utc>) -> Result<bool> {
        let changed = uow.conn().execute(
            "UPDATE game_events SET processed = 1, processed_at = ?2
             WHERE id = ?1 AND processed = 0",
            params![id, to_millis(at)],
        )?;
        Ok(changed == 1)
    }

    /// Number of events still waiting for the aggregator.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn pending_count(&self) -> Result<u64> {
        self.store.read(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM game_events WHERE processed = 0", [], |r| r.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        })
    }

    /// Newest-first audit of one user's events.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn events_for_user(&self, user: UserId, limit: usize) -> Result<Vec<GameEvent>> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare_cached(&format!("{SELECT_EVENT} WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"))?;
            let rows = stmt.query_map(params![user, limit_param(limit)], GameEvent::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Delete consumed events reported before `older_than`. Unconsumed events
    /// are never touched.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    pub fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.store.transaction(|uow| {
            Ok(uow.conn().execute(
                "DELETE FROM game_events WHERE processed = 1 AND created_at < ?1",
                params![to_millis(older_than)],
            )?)
        })
    }
}

/// Oldest-first unconsumed events on an already-held connection.
pub(crate) fn unprocessed(conn: &Connection, limit: usize) -> Result<Vec<GameEvent>> {
    let mut stmt =
        conn.prepare_cached(&format!("{SELECT_EVENT} WHERE processed = 0 ORDER BY id ASC LIMIT ?1"))?;
    let rows = stmt.query_map(params![limit_param(limit)], GameEvent::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
