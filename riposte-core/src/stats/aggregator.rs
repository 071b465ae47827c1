//! Stat aggregator: folds unconsumed events into per-user stats.
//!
//! One batch is one unit of work. For each event the aggregator first claims
//! it (`processed` 0→1, conditional) and only applies its deltas when the
//! claim changed a row. A replayed batch, or a second aggregator racing on
//! the same events, therefore adds nothing. A crash before commit leaves
//! both the claims and the deltas unwritten. Every touched user is queued in
//! `pending_evaluations` by the same unit of work.
//!
//! Malformed context never blocks the queue: the event is claimed, yields no
//! deltas, and a warning is logged.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::achievements::queue_evaluation;
use crate::error::{AggregationError, Result};
use crate::events::{self, EventDispatcher, EventPayload, GameEvent};
use crate::stats::{apply_delta, names, stat_value, stats_for_user, UserStat};
use crate::store::Store;
use crate::types::UserId;

/// One (user, stat, delta) update derived from an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatDelta {
    /// Owner.
    pub user: UserId,
    /// Stat name.
    pub stat: String,
    /// Amount to add.
    pub delta: f64,
}

impl StatDelta {
    /// Build a delta.
    #[must_use]
    pub fn new(user: UserId, stat: impl Into<String>, delta: f64) -> Self {
        Self {
            user,
            stat: stat.into(),
            delta,
        }
    }
}

/// Outcome of one `process_batch`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Events this batch claimed (including malformed ones).
    pub claimed: usize,
    /// Events already consumed by someone else; contributed nothing.
    pub skipped: usize,
    /// Claimed events whose context could not be decoded.
    pub malformed: usize,
    /// Stat deltas written.
    pub deltas_applied: usize,
    /// Users with at least one applied delta, ascending.
    pub touched_users: Vec<UserId>,
}

/// The fixed kind→stat lookup.
///
/// # Errors
///
/// Returns the decode error for malformed context; the caller decides what
/// to do with the event.
pub fn derive_deltas(event: &GameEvent) -> std::result::Result<Vec<StatDelta>, AggregationError> {
    let user = event.user;
    let one = |stat: &str| StatDelta::new(user, stat, 1.0);
    let amount = |stat: &str| StatDelta::new(user, stat, event.magnitude);

    let deltas = match EventPayload::decode(event)? {
        EventPayload::Kill { boss } => {
            let mut d = vec![one(names::TOTAL_KILLS)];
            if boss {
                d.push(one(names::BOSS_KILLS));
            }
            d
        }
        EventPayload::ParrySuccess { perfect, .. } => {
            let mut d = vec![one(names::TOTAL_PARRY_SUCCESS), amount(names::DAMAGE_AVOIDED)];
            if perfect {
                d.push(one(names::TOTAL_PERFECT_PARRIES));
            }
            d
        }
        EventPayload::ParryFailed => vec![one(names::TOTAL_PARRY_FAILED)],
        EventPayload::Counterattack { bonus } => {
            let mut d = vec![one(names::TOTAL_COUNTERATTACKS)];
            if bonus {
                d.push(one(names::BONUS_COUNTERATTACKS));
            }
            d
        }
        EventPayload::DamageDealt => vec![amount(names::TOTAL_DAMAGE_DEALT)],
        EventPayload::ItemCrafted => vec![amount(names::ITEMS_CRAFTED)],
        EventPayload::GoldSpent => vec![amount(names::GOLD_SPENT)],
        EventPayload::QuestCompleted => vec![one(names::QUESTS_COMPLETED)],
        EventPayload::Other { name } => vec![amount(&name)],
    };
    Ok(deltas)
}

/// Batch consumer of the event log.
#[derive(Debug, Clone)]
pub struct StatAggregator {
    store: Arc<Store>,
}

impl StatAggregator {
    /// Build an aggregator over `store`.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Claim `events` and fold their deltas, all in one unit of work.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if any write fails; in that case no event
    /// is marked processed and no delta is applied.
    pub fn process_batch(&self, events: &[GameEvent]) -> Result<BatchReport> {
        self.process_batch_at(events, Utc::now())
    }

    /// [`StatAggregator::process_batch`] with an explicit processing time.
    ///
    /// # Errors
    ///
    /// As [`StatAggregator::process_batch`].
    pub fn process_batch_at(&self, events: &[GameEvent], at: DateTime<Utc>) -> Result<BatchReport> {
        if events.is_empty() {
            return Ok(BatchReport::default());
        }
        let start = Instant::now();

        let report = self.store.transaction(|uow| {
            let mut report = BatchReport::default();
            let mut touched = BTreeSet::new();

            for event in events {
                if !EventDispatcher::claim(uow, event.id, at)? {
                    report.skipped += 1;
                    continue;
                }
                report.claimed += 1;

                match derive_deltas(event) {
                    Ok(deltas) => {
                        for delta in &deltas {
                            apply_delta(uow, delta, at)?;
                            touched.insert(delta.user);
                        }
                        report.deltas_applied += deltas.len();
                    }
                    Err(err) => {
                        warn!(
                            event = %event.id,
                            kind = %event.kind,
                            user = %event.user,
                            error = %err,
                            "Malformed event context, consumed with zero deltas"
                        );
                        report.malformed += 1;
                    }
                }
            }

            uow.count(|c| &c.events_processed, report.claimed as u64);
            uow.count(|c| &c.events_malformed, report.malformed as u64);
            for user in &touched {
                queue_evaluation(uow.conn(), *user, at)?;
            }
            report.touched_users = touched.into_iter().collect();
            Ok(report)
        })?;

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                skipped = report.skipped,
                malformed = report.malformed,
                deltas = report.deltas_applied,
                users = report.touched_users.len(),
                elapsed_us = start.elapsed().as_micros(),
                "Aggregation batch committed"
            );
        } else {
            debug!(skipped = report.skipped, "Aggregation batch had nothing to claim");
        }
        Ok(report)
    }

    /// Read up to `limit` unconsumed events and process them.
    ///
    /// # Errors
    ///
    /// As [`StatAggregator::process_batch`].
    pub fn run_once(&self, limit: usize) -> Result<BatchReport> {
        let events = self.store.read(|conn| events::unprocessed(conn, limit))?;
        self.process_batch(&events)
    }

    /// Current value of one stat (0 when never touched).
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn stat(&self, user: UserId, stat: &str) -> Result<f64> {
        self.store.read(|conn| stat_value(conn, user, stat))
    }

    /// All stats of one user.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn stats_for_user(&self, user: UserId) -> Result<Vec<UserStat>> {
        self.store.read(|conn| stats_for_user(conn, user))
    }
}
