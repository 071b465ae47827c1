//! Parry window rows and their status machine.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{TargetId, UserId, WindowId, from_millis, to_millis};

/// Lifecycle of a window. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    /// Raised and waiting for an attack.
    Active,
    /// Parried outside the perfect threshold.
    Success,
    /// Parried inside the perfect threshold.
    Perfect,
    /// Lapsed, either by late resolution or by expiry.
    Failed,
    /// Dropped by the player or the host game.
    Cancelled,
}

impl WindowStatus {
    /// Storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Success => "success",
            Self::Perfect => "perfect",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Inverse of [`WindowStatus::as_str`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "active" => Some(Self::Active),
            "success" => Some(Self::Success),
            "perfect" => Some(Self::Perfect),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the status can never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }

    /// Whether a counterattack may follow.
    #[must_use]
    pub fn is_parried(self) -> bool {
        matches!(self, Self::Success | Self::Perfect)
    }
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One defensive window, kept after it ends as an audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParryWindow {
    /// Window id; also the telemetry correlation id.
    pub id: WindowId,
    /// Defender.
    pub user: UserId,
    /// Attacker the window guards against.
    pub target: TargetId,
    /// When the window opened.
    pub activated_at: DateTime<Utc>,
    /// `activated_at + window_ms`.
    pub expires_at: DateTime<Utc>,
    /// Current status.
    pub status: WindowStatus,
    /// Attack time minus activation, once resolved.
    pub reaction_ms: Option<i64>,
    /// Incoming damage at resolution.
    pub damage_in: Option<f64>,
    /// Damage passed through at resolution or expiry.
    pub damage_taken: Option<f64>,
    /// When the status turned terminal.
    pub resolved_at: Option<DateTime<Utc>>,
    /// First recorded counterattack.
    pub counter_at: Option<DateTime<Utc>>,
    /// Multiplier granted to that counterattack.
    pub counter_multiplier: Option<f64>,
}

impl ParryWindow {
    /// Whether `now` is strictly past expiry while the window is still active.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == WindowStatus::Active && now > self.expires_at
    }
}

pub(crate) const SELECT_WINDOW: &str = "SELECT id, user_id, target_id, activated_at, expires_at, status,
            reaction_ms, damage_in, damage_taken, resolved_at, counter_at, counter_multiplier
     FROM parry_windows";

fn opt_time(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<ParryWindow> {
    let status: String = row.get(5)?;
    let status = WindowStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown window status `{status}`").into(),
        )
    })?;
    Ok(ParryWindow {
        id: row.get(0)?,
        user: row.get(1)?,
        target: row.get(2)?,
        activated_at: from_millis(row.get(3)?)?,
        expires_at: from_millis(row.get(4)?)?,
        status,
        reaction_ms: row.get(6)?,
        damage_in: row.get(7)?,
        damage_taken: row.get(8)?,
        resolved_at: opt_time(row.get(9)?)?,
        counter_at: opt_time(row.get(10)?)?,
        counter_multiplier: row.get(11)?,
    })
}

pub(crate) fn load(conn: &Connection, id: WindowId) -> Result<Option<ParryWindow>> {
    let mut stmt = conn.prepare_cached(&format!("{SELECT_WINDOW} WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], from_row).optional()?)
}

pub(crate) fn load_active(conn: &Connection, user: UserId) -> Result<Option<ParryWindow>> {
    let mut stmt = conn.prepare_cached(&format!("{SELECT_WINDOW} WHERE user_id = ?1 AND status = 'active'"))?;
    Ok(stmt.query_row(params![user], from_row).optional()?)
}

/// Insert a new active window unless the user already has one.
///
/// Returns `false` when the partial unique index turned the insert into a
/// no-op.
pub(crate) fn insert_active(conn: &Connection, window: &ParryWindow) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO parry_windows (id, user_id, target_id, activated_at, expires_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active')
         ON CONFLICT DO NOTHING",
        params![
            window.id,
            window.user,
            window.target,
            to_millis(window.activated_at),
            to_millis(window.expires_at)
        ],
    )?;
    Ok(inserted == 1)
}

pub(crate) fn history(conn: &Connection, user: UserId, limit: i64) -> Result<Vec<ParryWindow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{SELECT_WINDOW} WHERE user_id = ?1 ORDER BY activated_at DESC, rowid DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![user, limit], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn stale_ids(conn: &Connection, now: DateTime<Utc>, limit: i64) -> Result<Vec<WindowId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM parry_windows WHERE status = 'active' AND expires_at < ?1
         ORDER BY expires_at LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![to_millis(now), limit], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
