//! Reward application for granted achievement rungs.
//!
//! Grants run inside the tracker's unit of work, so a reward is applied if
//! and only if the tier advance that earned it commits.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::achievements::definition::Reward;
use crate::error::Result;
use crate::store::UnitOfWork;
use crate::types::{UserId, from_millis, to_millis};

/// One rung's payout, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardGrant {
    /// Recipient.
    pub user: UserId,
    /// Achievement key.
    pub achievement: String,
    /// 1-based rung (tier index or repetition number).
    pub tier: u32,
    /// Rung display name.
    pub tier_name: String,
    /// Payout.
    pub reward: Reward,
    /// Grant time.
    pub granted_at: DateTime<Utc>,
}

/// Applies rewards on behalf of the economy.
pub trait RewardSink: Send + Sync {
    /// Apply `grant` inside `uow`.
    ///
    /// Returns `false` if this exact (user, achievement, tier) was already
    /// paid, in which case nothing was applied.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole evaluation.
    fn grant(&self, uow: &mut UnitOfWork<'_>, grant: &RewardGrant) -> Result<bool>;
}

/// Records grants in the `reward_grants` ledger, keyed uniquely by
/// (user, achievement, tier). The economy reads the ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LedgerRewards;

impl RewardSink for LedgerRewards {
    fn grant(&self, uow: &mut UnitOfWork<'_>, grant: &RewardGrant) -> Result<bool> {
        let inserted = uow.conn().execute(
            "INSERT INTO reward_grants
                (user_id, achievement, tier, tier_name, gold, xp, title, granted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, achievement, tier) DO NOTHING",
            params![
                grant.user,
                grant.achievement,
                grant.tier,
                grant.tier_name,
                grant.reward.gold,
                grant.reward.xp,
                grant.reward.title,
                to_millis(grant.granted_at),
            ],
        )?;
        Ok(inserted == 1)
    }
}

/// Ledger rows for one user, oldest first.
///
/// # Errors
///
/// Returns a persistence error if the query fails.
pub fn grants_for_user(conn: &Connection, user: UserId) -> Result<Vec<RewardGrant>> {
    let mut stmt = conn.prepare_cached(
        "SELECT achievement, tier, tier_name, gold, xp, title, granted_at
         FROM reward_grants WHERE user_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![user], |row| {
        Ok(RewardGrant {
            user,
            achievement: row.get(0)?,
            tier: row.get(1)?,
            tier_name: row.get(2)?,
            reward: Reward {
                gold: row.get(3)?,
                xp: row.get(4)?,
                title: row.get(5)?,
            },
            granted_at: from_millis(row.get(6)?)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
