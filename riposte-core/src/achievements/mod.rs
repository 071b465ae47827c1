//! Achievement tracker: turns aggregated stats into tier unlocks.
//!
//! For each definition the tracker reads the tracked stat, works out how many
//! rungs the value reaches, and compares that with the stored rung. When the
//! value jumps several rungs at once, every rung in between is granted too,
//! in order, each with its own reward. The advance is a compare-and-set on
//! the stored rung, run in the same unit of work as the reward grants, so a
//! concurrent or repeated evaluation cannot pay a rung twice and the stored
//! rung never goes down.

pub mod definition;
pub mod rewards;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::stats::stat_value;
use crate::store::{Store, UnitOfWork};
use crate::telemetry::TelemetryRecord;
use crate::types::{UserId, from_millis, to_millis};

pub use definition::{AchievementCatalog, AchievementDefinition, Repeat, Reward, Tier};
pub use rewards::{LedgerRewards, RewardGrant, RewardSink};

/// Stored progress of one user on one achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAchievementProgress {
    /// Owner.
    pub user: UserId,
    /// Achievement key.
    pub achievement: String,
    /// Highest tier granted (0 = none). Progressive achievements keep 0 here.
    pub current_tier: u32,
    /// Last observed stat value.
    pub progress: f64,
    /// Repetitions paid for progressive achievements.
    pub repetitions: u32,
    /// When the latest rung was granted.
    pub unlocked_at: Option<DateTime<Utc>>,
    /// Last evaluation that touched the row.
    pub updated_at: DateTime<Utc>,
}

impl UserAchievementProgress {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user: row.get(0)?,
            achievement: row.get(1)?,
            current_tier: row.get(2)?,
            progress: row.get(3)?,
            repetitions: row.get(4)?,
            unlocked_at: row.get::<_, Option<i64>>(5)?.map(from_millis).transpose()?,
            updated_at: from_millis(row.get(6)?)?,
        })
    }
}

/// One rung granted by an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unlock {
    /// Achievement key.
    pub achievement: String,
    /// 1-based rung.
    pub tier: u32,
    /// Rung display name.
    pub tier_name: String,
    /// What was paid.
    pub reward: Reward,
}

const SELECT_PROGRESS: &str = "SELECT user_id, achievement, current_tier, progress, repetitions, unlocked_at, updated_at
     FROM user_achievements";

/// Compares stats against achievement ladders and pays out rungs.
pub struct AchievementTracker {
    store: Arc<Store>,
    catalog: Arc<AchievementCatalog>,
    rewards: Arc<dyn RewardSink>,
}

impl std::fmt::Debug for AchievementTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AchievementTracker")
            .field("achievements", &self.catalog.achievements.len())
            .finish_non_exhaustive()
    }
}

impl AchievementTracker {
    /// Tracker paying into the `reward_grants` ledger.
    #[must_use]
    pub fn new(store: Arc<Store>, catalog: Arc<AchievementCatalog>) -> Self {
        Self::with_rewards(store, catalog, Arc::new(LedgerRewards))
    }

    /// Tracker paying through a custom sink.
    #[must_use]
    pub fn with_rewards(store: Arc<Store>, catalog: Arc<AchievementCatalog>, rewards: Arc<dyn RewardSink>) -> Self {
        Self {
            store,
            catalog,
            rewards,
        }
    }

    /// The definitions this tracker was built with.
    #[must_use]
    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// Evaluate every catalog definition for `user`.
    ///
    /// # Errors
    ///
    /// As [`AchievementTracker::evaluate`].
    /// Also clears any queued evaluation for `user` in the same unit of
    /// work, so a failed evaluation stays queued.
    pub fn evaluate_user(&self, user: UserId) -> Result<Vec<Unlock>> {
        self.evaluate_with(user, &self.catalog.achievements, true)
    }

    /// Evaluate `definitions` for `user` in one unit of work and return the
    /// rungs granted, in grant order.
    ///
    /// # Errors
    ///
    /// Returns a persistence error (or the reward sink's error); nothing is
    /// granted or advanced in that case.
    pub fn evaluate(&self, user: UserId, definitions: &[AchievementDefinition]) -> Result<Vec<Unlock>> {
        self.evaluate_with(user, definitions, false)
    }

    fn evaluate_with(&self, user: UserId, definitions: &[AchievementDefinition], dequeue: bool) -> Result<Vec<Unlock>> {
        let now = Utc::now();
        let unlocks = self.store.transaction(|uow| {
            let mut unlocks = Vec::new();
            for def in definitions {
                self.evaluate_one(uow, user, def, now, &mut unlocks)?;
            }
            if dequeue {
                uow.conn()
                    .execute("DELETE FROM pending_evaluations WHERE user_id = ?1", params![user])?;
            }
            Ok(unlocks)
        })?;

        if !unlocks.is_empty() {
            info!(
                user = %user,
                granted = unlocks.len(),
                "Achievement rungs granted"
            );
        }
        Ok(unlocks)
    }

    fn evaluate_one(
        &self,
        uow: &mut UnitOfWork<'_>,
        user: UserId,
        def: &AchievementDefinition,
        now: DateTime<Utc>,
        unlocks: &mut Vec<Unlock>,
    ) -> Result<()> {
        let value = stat_value(uow.conn(), user, &def.stat)?;
        let existing = load_progress(uow.conn(), user, &def.key)?;

        // Rows are created on the first qualifying value, not on first look.
        if existing.is_none() && value <= 0.0 {
            return Ok(());
        }
        if existing.is_none() {
            uow.conn().execute(
                "INSERT INTO user_achievements (user_id, achievement, current_tier, progress, repetitions, updated_at)
                 VALUES (?1, ?2, 0, ?3, 0, ?4)
                 ON CONFLICT(user_id, achievement) DO NOTHING",
                params![user, def.key, value, to_millis(now)],
            )?;
        }

        let column = if def.is_progressive() { "repetitions" } else { "current_tier" };
        let stored = existing
            .as_ref()
            .map_or(0, |p| if def.is_progressive() { p.repetitions } else { p.current_tier });
        let reached = def.rungs_at(value);

        if reached <= stored {
            uow.conn().execute(
                "UPDATE user_achievements SET progress = ?3, updated_at = ?4
                 WHERE user_id = ?1 AND achievement = ?2",
                params![user, def.key, value, to_millis(now)],
            )?;
            return Ok(());
        }

        // Compare-and-set: only the evaluator that moves the rung from the
        // value it read pays the rungs in between.
        let advanced = uow.conn().execute(
            &format!(
                "UPDATE user_achievements
                 SET {column} = ?3, progress = ?4, unlocked_at = ?5, updated_at = ?5
                 WHERE user_id = ?1 AND achievement = ?2 AND {column} = ?6"
            ),
            params![user, def.key, reached, value, to_millis(now), stored],
        )?;
        if advanced == 0 {
            debug!(user = %user, achievement = %def.key, "Rung already advanced by another evaluation");
            return Ok(());
        }

        for rung in (stored + 1)..=reached {
            let Some((tier_name, reward)) = def.rung(rung) else {
                continue;
            };
            let grant = RewardGrant {
                user,
                achievement: def.key.clone(),
                tier: rung,
                tier_name,
                reward,
                granted_at: now,
            };
            if !self.rewards.grant(uow, &grant)? {
                continue;
            }

            uow.count(|c| &c.tiers_granted, 1);
            uow.emit(
                TelemetryRecord::new(user, "achievement_unlocked", format!("{}:{rung}", def.key), now)
                    .with_meta("achievement", def.key.as_str())
                    .with_meta("tier", rung)
                    .with_meta("tier_name", grant.tier_name.as_str())
                    .with_meta("gold", grant.reward.gold)
                    .with_meta("xp", grant.reward.xp)
                    .with_meta("progress", value),
            );
            unlocks.push(Unlock {
                achievement: grant.achievement,
                tier: rung,
                tier_name: grant.tier_name,
                reward: grant.reward,
            });
        }
        Ok(())
    }

    /// Users queued for evaluation, lowest id first.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn pending_users(&self, limit: usize) -> Result<Vec<UserId>> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT user_id FROM pending_evaluations ORDER BY user_id LIMIT ?1")?;
            let rows = stmt.query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                row.get::<_, UserId>(0)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Stored progress of `user` on one achievement.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn progress(&self, user: UserId, achievement: &str) -> Result<Option<UserAchievementProgress>> {
        self.store.read(|conn| load_progress(conn, user, achievement))
    }

    /// All progress rows of `user`, by key.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn progress_for_user(&self, user: UserId) -> Result<Vec<UserAchievementProgress>> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare_cached(&format!("{SELECT_PROGRESS} WHERE user_id = ?1 ORDER BY achievement"))?;
            let rows = stmt.query_map(params![user], UserAchievementProgress::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Reward ledger of `user`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn grants(&self, user: UserId) -> Result<Vec<RewardGrant>> {
        self.store.read(|conn| rewards::grants_for_user(conn, user))
    }
}

/// Queue `user` for evaluation. Idempotent; the first queue time is kept.
pub(crate) fn queue_evaluation(conn: &Connection, user: UserId, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_evaluations (user_id, queued_at) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO NOTHING",
        params![user, to_millis(at)],
    )?;
    Ok(())
}

fn load_progress(conn: &Connection, user: UserId, achievement: &str) -> Result<Option<UserAchievementProgress>> {
    let mut stmt =
        conn.prepare_cached(&format!("{SELECT_PROGRESS} WHERE user_id = ?1 AND achievement = ?2"))?;
    Ok(stmt
        .query_row(params![user, achievement], UserAchievementProgress::from_row)
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::stats::{StatDelta, apply_delta, names};
    use crate::telemetry::MemorySink;
    use super::definition::tier;

    struct Fixture {
        store: Arc<Store>,
        sink: Arc<MemorySink>,
        tracker: AchievementTracker,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(Store::open_in_memory(&PersistenceConfig::default(), sink.clone()).expect("open"));
        let catalog = AchievementCatalog::new(vec![
            AchievementDefinition::tiered(
                "parry_master",
                names::TOTAL_PARRY_SUCCESS,
                vec![
                    tier("bronze", 10.0, 100, 10),
                    tier("silver", 50.0, 500, 50),
                    tier("gold", 200.0, 2000, 200),
                ],
            ),
            AchievementDefinition::progressive(
                "crafter",
                names::ITEMS_CRAFTED,
                25.0,
                Reward {
                    gold: 40,
                    xp: 0,
                    title: None,
                },
            ),
        ])
        .expect("catalog");
        let tracker = AchievementTracker::new(store.clone(), Arc::new(catalog));
        Fixture { store, sink, tracker }
    }

    fn bump(store: &Store, user: UserId, stat: &str, delta: f64) {
        store
            .transaction(|uow| apply_delta(uow, &StatDelta::new(user, stat, delta), Utc::now()))
            .expect("bump");
    }

    #[test]
    fn no_row_until_first_qualifying_value() {
        let f = fixture();
        assert!(f.tracker.evaluate_user(UserId(1)).expect("eval").is_empty());
        assert!(f.tracker.progress(UserId(1), "parry_master").expect("read").is_none());
    }

    #[test]
    fn jump_grants_every_intermediate_tier_in_order() {
        let f = fixture();
        let user = UserId(1);
        bump(&f.store, user, names::TOTAL_PARRY_SUCCESS, 5.0);
        assert!(f.tracker.evaluate_user(user).expect("eval").is_empty());

        bump(&f.store, user, names::TOTAL_PARRY_SUCCESS, 55.0);
        let unlocks = f.tracker.evaluate_user(user).expect("eval");
        let tier_names: Vec<_> = unlocks.iter().map(|u| u.tier_name.as_str()).collect();
        assert_eq!(tier_names, vec!["bronze", "silver"]);

        let progress = f.tracker.progress(user, "parry_master").expect("read").expect("row");
        assert_eq!(progress.current_tier, 2);
        assert!((progress.progress - 60.0).abs() < f64::EPSILON);
        assert!(progress.unlocked_at.is_some());
        assert_eq!(f.sink.of_type("achievement_unlocked").len(), 2);
    }

    #[test]
    fn rerun_on_unchanged_stats_grants_nothing() {
        let f = fixture();
        let user = UserId(2);
        bump(&f.store, user, names::TOTAL_PARRY_SUCCESS, 60.0);
        assert_eq!(f.tracker.evaluate_user(user).expect("first").len(), 2);
        assert!(f.tracker.evaluate_user(user).expect("second").is_empty());
        assert_eq!(f.tracker.grants(user).expect("ledger").len(), 2);
        assert_eq!(f.store.counters().snapshot().tiers_granted, 2);
    }

    #[test]
    fn progressive_pays_each_repetition() {
        let f = fixture();
        let user = UserId(3);
        bump(&f.store, user, names::ITEMS_CRAFTED, 30.0);
        let first = f.tracker.evaluate_user(user).expect("eval");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].tier_name, "crafter#1");

        bump(&f.store, user, names::ITEMS_CRAFTED, 50.0);
        let second = f.tracker.evaluate_user(user).expect("eval");
        assert_eq!(second.iter().map(|u| u.tier).collect::<Vec<_>>(), vec![2, 3]);

        let progress = f.tracker.progress(user, "crafter").expect("read").expect("row");
        assert_eq!(progress.repetitions, 3);
        assert_eq!(progress.current_tier, 0);
        let gold: i64 = f.tracker.grants(user).expect("ledger").iter().map(|g| g.reward.gold).sum();
        assert_eq!(gold, 120);
    }

    #[test]
    fn stored_tier_never_decreases() {
        let f = fixture();
        let user = UserId(4);
        bump(&f.store, user, names::TOTAL_PARRY_SUCCESS, 60.0);
        f.tracker.evaluate_user(user).expect("eval");

        // Stats are accumulators, but a correction could lower them.
        bump(&f.store, user, names::TOTAL_PARRY_SUCCESS, -55.0);
        f.tracker.evaluate_user(user).expect("eval");
        let progress = f.tracker.progress(user, "parry_master").expect("read").expect("row");
        assert_eq!(progress.current_tier, 2);
        assert!((progress.progress - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failing_reward_sink_rolls_back_the_advance() {
        struct Broke;
        impl RewardSink for Broke {
            fn grant(&self, _uow: &mut UnitOfWork<'_>, _grant: &RewardGrant) -> Result<bool> {
                Err(crate::error::RiposteError::Config("economy offline".into()))
            }
        }

        let f = fixture();
        let user = UserId(5);
        bump(&f.store, user, names::TOTAL_PARRY_SUCCESS, 12.0);
        let broken = AchievementTracker::with_rewards(f.store.clone(), Arc::new(f.tracker.catalog().clone()), Arc::new(Broke));
        assert!(broken.evaluate_user(user).is_err());
        assert!(f.tracker.progress(user, "parry_master").expect("read").is_none());
        assert!(f.sink.of_type("achievement_unlocked").is_empty());

        assert_eq!(f.tracker.evaluate_user(user).expect("retry").len(), 1);
    }
}
