//! Per-user parry statistics, updated in the same unit of work as the window
//! transition they describe.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{UserId, from_millis, to_millis};

/// Running parry record of one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParryStatistics {
    /// Owner.
    pub user: UserId,
    /// Windows that ended in a parry or a failure.
    pub attempts: u64,
    /// SUCCESS and PERFECT resolutions.
    pub successes: u64,
    /// PERFECT resolutions.
    pub perfects: u64,
    /// Late resolutions and expiries.
    pub failures: u64,
    /// Cancelled windows. Not attempts.
    pub cancels: u64,
    /// Consecutive parries since the last failure.
    pub current_streak: u32,
    /// Longest streak ever.
    pub best_streak: u32,
    /// Damage negated.
    pub damage_avoided: f64,
    /// Damage passed through, parried or not.
    pub damage_taken: f64,
    /// Sum of reaction times over successful parries.
    pub reaction_ms_total: i64,
    /// Number of samples in `reaction_ms_total`.
    pub reaction_samples: u64,
    /// Quickest successful reaction.
    pub fastest_reaction_ms: Option<i64>,
    /// Counterattacks recorded.
    pub counterattacks: u64,
    /// Counterattacks inside the bonus window.
    pub counter_bonus_hits: u64,
    /// Last update, `None` for a user with no parry history.
    pub updated_at: Option<DateTime<Utc>>,
}

impl ParryStatistics {
    /// Mean reaction over successful parries.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_reaction_ms(&self) -> Option<f64> {
        if self.reaction_samples == 0 {
            return None;
        }
        Some(self.reaction_ms_total as f64 / self.reaction_samples as f64)
    }

    /// Successes over attempts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            return None;
        }
        Some(self.successes as f64 / self.attempts as f64)
    }
}

/// Load the record of `user`, zeroed if there is none yet.
///
/// # Errors
///
/// Returns a persistence error if the query fails.
pub fn load(conn: &Connection, user: UserId) -> Result<ParryStatistics> {
    let row = conn
        .query_row(
            "SELECT attempts, successes, perfects, failures, cancels, current_streak, best_streak,
                    damage_avoided, damage_taken, reaction_ms_total, reaction_samples,
                    fastest_reaction_ms, counterattacks, counter_bonus_hits, updated_at
             FROM parry_stats WHERE user_id = ?1",
            params![user],
            |row| {
                Ok(ParryStatistics {
                    user,
                    attempts: row.get(0)?,
                    successes: row.get(1)?,
                    perfects: row.get(2)?,
                    failures: row.get(3)?,
                    cancels: row.get(4)?,
                    current_streak: row.get(5)?,
                    best_streak: row.get(6)?,
                    damage_avoided: row.get(7)?,
                    damage_taken: row.get(8)?,
                    reaction_ms_total: row.get(9)?,
                    reaction_samples: row.get(10)?,
                    fastest_reaction_ms: row.get(11)?,
                    counterattacks: row.get(12)?,
                    counter_bonus_hits: row.get(13)?,
                    updated_at: Some(from_millis(row.get(14)?)?),
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or(ParryStatistics {
        user,
        ..ParryStatistics::default()
    }))
}

/// A SUCCESS or PERFECT resolution: extends the streak.
pub(crate) fn record_parry(
    conn: &Connection,
    user: UserId,
    perfect: bool,
    reaction_ms: i64,
    avoided: f64,
    taken: f64,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO parry_stats (user_id, attempts, successes, perfects, current_streak, best_streak,
                                  damage_avoided, damage_taken, reaction_ms_total, reaction_samples,
                                  fastest_reaction_ms, updated_at)
         VALUES (?1, 1, 1, ?2, 1, 1, ?3, ?4, ?5, 1, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
            attempts            = attempts + 1,
            successes           = successes + 1,
            perfects            = perfects + excluded.perfects,
            current_streak      = current_streak + 1,
            best_streak         = MAX(best_streak, current_streak + 1),
            damage_avoided      = damage_avoided + excluded.damage_avoided,
            damage_taken        = damage_taken + excluded.damage_taken,
            reaction_ms_total   = reaction_ms_total + excluded.reaction_ms_total,
            reaction_samples    = reaction_samples + 1,
            fastest_reaction_ms = MIN(COALESCE(fastest_reaction_ms, excluded.fastest_reaction_ms),
                                      excluded.fastest_reaction_ms),
            updated_at          = excluded.updated_at",
        params![user, i64::from(perfect), avoided, taken, reaction_ms, to_millis(at)],
    )?;
    Ok(())
}

/// A late resolution or an expiry: resets the streak.
pub(crate) fn record_failure(conn: &Connection, user: UserId, taken: f64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO parry_stats (user_id, attempts, failures, current_streak, damage_taken, updated_at)
         VALUES (?1, 1, 1, 0, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
            attempts       = attempts + 1,
            failures       = failures + 1,
            current_streak = 0,
            damage_taken   = damage_taken + excluded.damage_taken,
            updated_at     = excluded.updated_at",
        params![user, taken, to_millis(at)],
    )?;
    Ok(())
}

/// A cancelled window. The streak is left alone.
pub(crate) fn record_cancel(conn: &Connection, user: UserId, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO parry_stats (user_id, cancels, updated_at)
         VALUES (?1, 1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET
            cancels    = cancels + 1,
            updated_at = excluded.updated_at",
        params![user, to_millis(at)],
    )?;
    Ok(())
}

pub(crate) fn record_counter(conn: &Connection, user: UserId, bonus: bool, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO parry_stats (user_id, counterattacks, counter_bonus_hits, updated_at)
         VALUES (?1, 1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
            counterattacks     = counterattacks + 1,
            counter_bonus_hits = counter_bonus_hits + excluded.counter_bonus_hits,
            updated_at         = excluded.updated_at",
        params![user, i64::from(bonus), to_millis(at)],
    )?;
    Ok(())
}
