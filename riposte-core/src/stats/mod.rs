//! Per-user aggregated statistics.
//!
//! A `UserStat` is a lazily created accumulator keyed by (user, stat name).
//! Only the aggregator writes here; everything else reads.

pub mod aggregator;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::UnitOfWork;
use crate::types::{UserId, from_millis, to_millis};

pub use aggregator::{BatchReport, StatAggregator, StatDelta, derive_deltas};

/// Stat names produced by the fixed event→stat lookup.
pub mod names {
    /// Every kill.
    pub const TOTAL_KILLS: &str = "total_kills";
    /// Kills flagged `boss` in context.
    pub const BOSS_KILLS: &str = "boss_kills";
    /// SUCCESS and PERFECT resolutions.
    pub const TOTAL_PARRY_SUCCESS: &str = "total_parry_success";
    /// PERFECT resolutions only.
    pub const TOTAL_PERFECT_PARRIES: &str = "total_perfect_parries";
    /// FAILED windows.
    pub const TOTAL_PARRY_FAILED: &str = "total_parry_failed";
    /// Damage negated by parries.
    pub const DAMAGE_AVOIDED: &str = "damage_avoided";
    /// Counterattacks recorded.
    pub const TOTAL_COUNTERATTACKS: &str = "total_counterattacks";
    /// Counterattacks that landed in the bonus window.
    pub const BONUS_COUNTERATTACKS: &str = "bonus_counterattacks";
    /// Outgoing damage.
    pub const TOTAL_DAMAGE_DEALT: &str = "total_damage_dealt";
    /// Items crafted.
    pub const ITEMS_CRAFTED: &str = "items_crafted";
    /// Gold spent.
    pub const GOLD_SPENT: &str = "gold_spent";
    /// Quests turned in.
    pub const QUESTS_COMPLETED: &str = "quests_completed";
}

/// One accumulator row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStat {
    /// Owner.
    pub user: UserId,
    /// Stat name.
    pub stat: String,
    /// Accumulated value.
    pub value: f64,
    /// Last time a delta touched it.
    pub updated_at: DateTime<Utc>,
}

/// Current value of one stat. Missing rows read as `0.0`.
///
/// # Errors
///
/// Returns a persistence error if the query fails.
pub fn stat_value(conn: &Connection, user: UserId, stat: &str) -> Result<f64> {
    let value = conn
        .query_row(
            "SELECT value FROM user_stats WHERE user_id = ?1 AND stat = ?2",
            params![user, stat],
            |row| row.get::<_, f64>(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0.0))
}

/// Every stat row for a user, sorted by name.
///
/// # Errors
///
/// Returns a persistence error if the query fails.
pub fn stats_for_user(conn: &Connection, user: UserId) -> Result<Vec<UserStat>> {
    let mut stmt = conn.prepare_cached(
        "SELECT stat, value, updated_at FROM user_stats WHERE user_id = ?1 ORDER BY stat",
    )?;
    let rows = stmt.query_map(params![user], |row| {
        Ok(UserStat {
            user,
            stat: row.get(0)?,
            value: row.get(1)?,
            updated_at: from_millis(row.get(2)?)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Add `delta` to a stat, creating the row on first touch.
///
/// # Errors
///
/// Returns a persistence error if the upsert fails.
pub fn apply_delta(uow: &UnitOfWork<'_>, delta: &StatDelta, at: DateTime<Utc>) -> Result<()> {
    uow.conn().execute(
        "INSERT INTO user_stats (user_id, stat, value, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id, stat) DO UPDATE SET
            value = value + excluded.value,
            updated_at = excluded.updated_at",
        params![delta.user, delta.stat, delta.delta, to_millis(at)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::store::Store;
    use crate::telemetry::NullSink;
    use std::sync::Arc;

    #[test]
    fn missing_stat_reads_zero() {
        let store = Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open");
        let v = store.read(|c| stat_value(c, UserId(1), names::TOTAL_KILLS)).expect("read");
        assert!(v.abs() < f64::EPSILON);
    }

    #[test]
    fn deltas_accumulate() {
        let store = Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open");
        store
            .transaction(|uow| {
                for d in [3.0, 4.5] {
                    apply_delta(uow, &StatDelta::new(UserId(1), names::GOLD_SPENT, d), Utc::now())?;
                }
                apply_delta(uow, &StatDelta::new(UserId(1), names::TOTAL_KILLS, 1.0), Utc::now())
            })
            .expect("write");

        let rows = store.read(|c| stats_for_user(c, UserId(1))).expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stat, names::GOLD_SPENT);
        assert!((rows[0].value - 7.5).abs() < f64::EPSILON);
    }
}
