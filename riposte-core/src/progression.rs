//! One progression cycle: aggregate a batch, then drain the evaluation queue.
//!
//! The aggregation batch queues every user it touches in
//! `pending_evaluations`; a user leaves the queue only when an evaluation of
//! the full catalog commits. A failed evaluation is retried on later cycles
//! even if no new event arrives for that user.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::achievements::{AchievementCatalog, AchievementTracker, Unlock};
use crate::error::Result;
use crate::stats::{BatchReport, StatAggregator};
use crate::store::Store;
use crate::types::UserId;

/// What one [`Progression::run_cycle`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Events claimed by the aggregation batch.
    pub events_claimed: usize,
    /// Claimed events with malformed context.
    pub events_malformed: usize,
    /// Stat deltas written.
    pub deltas_applied: usize,
    /// Users whose evaluation committed.
    pub users_evaluated: usize,
    /// Users whose evaluation failed; they stay queued.
    pub evaluations_failed: usize,
    /// Rungs granted, per user, in grant order.
    pub unlocks: Vec<(UserId, Unlock)>,
}

/// Aggregator and tracker driven together.
#[derive(Debug)]
pub struct Progression {
    aggregator: StatAggregator,
    tracker: AchievementTracker,
}

impl Progression {
    /// Pipeline over `store` with `catalog`, paying into the reward ledger.
    #[must_use]
    pub fn new(store: Arc<Store>, catalog: Arc<AchievementCatalog>) -> Self {
        Self {
            aggregator: StatAggregator::new(store.clone()),
            tracker: AchievementTracker::new(store, catalog),
        }
    }

    /// Pipeline from prebuilt parts (custom reward sink, shared catalog).
    #[must_use]
    pub fn from_parts(aggregator: StatAggregator, tracker: AchievementTracker) -> Self {
        Self { aggregator, tracker }
    }

    /// The aggregator half.
    #[must_use]
    pub fn aggregator(&self) -> &StatAggregator {
        &self.aggregator
    }

    /// The tracker half.
    #[must_use]
    pub fn tracker(&self) -> &AchievementTracker {
        &self.tracker
    }

    /// Aggregate up to `limit` events, then evaluate up to `limit` queued
    /// users.
    ///
    /// The batch and each user's evaluation are separate units of work. A
    /// failing evaluation is logged and counted, the user stays queued, and
    /// the remaining users are still evaluated.
    ///
    /// # Errors
    ///
    /// Returns an aggregation error, or a persistence error reading the
    /// queue. Evaluation errors are reported in the [`CycleReport`].
    pub fn run_cycle(&self, limit: usize) -> Result<CycleReport> {
        let start = Instant::now();
        let BatchReport {
            claimed,
            malformed,
            deltas_applied,
            ..
        } = self.aggregator.run_once(limit)?;

        let mut report = CycleReport {
            events_claimed: claimed,
            events_malformed: malformed,
            deltas_applied,
            ..CycleReport::default()
        };
        for user in self.tracker.pending_users(limit)? {
            match self.tracker.evaluate_user(user) {
                Ok(unlocks) => {
                    report.users_evaluated += 1;
                    report.unlocks.extend(unlocks.into_iter().map(|unlock| (user, unlock)));
                }
                Err(err) => {
                    warn!(user = %user, error = %err, "Achievement evaluation failed, user stays queued");
                    report.evaluations_failed += 1;
                }
            }
        }

        if report.events_claimed > 0 || report.users_evaluated > 0 || report.evaluations_failed > 0 {
            info!(
                events = report.events_claimed,
                users = report.users_evaluated,
                failed = report.evaluations_failed,
                unlocks = report.unlocks.len(),
                elapsed_us = start.elapsed().as_micros(),
                "Progression cycle complete"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::events::{EventDispatcher, EventKind, NewEvent};
    use crate::achievements::{LedgerRewards, RewardGrant, RewardSink};
    use crate::error::RiposteError;
    use crate::store::UnitOfWork;
    use crate::telemetry::NullSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn cycle_aggregates_then_unlocks() {
        let store = Arc::new(Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open"));
        let dispatcher = EventDispatcher::new(store.clone());
        let progression = Progression::new(store, Arc::new(AchievementCatalog::builtin()));

        dispatcher
            .log_event(&NewEvent::new(EventKind::Kill, UserId(3), 1.0).with("boss", true))
            .expect("log");
        let report = progression.run_cycle(100).expect("cycle");

        assert_eq!(report.events_claimed, 1);
        assert_eq!(report.users_evaluated, 1);
        let keys: Vec<_> = report.unlocks.iter().map(|(_, u)| u.achievement.as_str()).collect();
        assert_eq!(keys, vec!["boss_hunter"]);

        let idle = progression.run_cycle(100).expect("cycle");
        assert_eq!(idle, CycleReport::default());
    }

    struct FlakyRewards {
        failures_left: AtomicU32,
    }

    impl RewardSink for FlakyRewards {
        fn grant(&self, uow: &mut UnitOfWork<'_>, grant: &RewardGrant) -> Result<bool> {
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(RiposteError::Config("economy briefly offline".into()));
            }
            LedgerRewards.grant(uow, grant)
        }
    }

    #[test]
    fn failed_evaluation_is_retried_on_a_later_cycle() {
        let store = Arc::new(Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open"));
        let dispatcher = EventDispatcher::new(store.clone());
        let rewards = Arc::new(FlakyRewards {
            failures_left: AtomicU32::new(1),
        });
        let progression = Progression::from_parts(
            StatAggregator::new(store.clone()),
            AchievementTracker::with_rewards(store, Arc::new(AchievementCatalog::builtin()), rewards),
        );

        for user in [UserId(3), UserId(4)] {
            dispatcher
                .log_event(&NewEvent::new(EventKind::Kill, user, 1.0).with("boss", true))
                .expect("log");
        }

        // User 3 is evaluated first and hits the outage; user 4 still runs.
        let first = progression.run_cycle(100).expect("cycle");
        assert_eq!(first.events_claimed, 2);
        assert_eq!(first.evaluations_failed, 1);
        assert_eq!(first.users_evaluated, 1);
        assert_eq!(first.unlocks.len(), 1);
        assert_eq!(first.unlocks[0].0, UserId(4));
        assert_eq!(progression.tracker().pending_users(10).expect("queue"), vec![UserId(3)]);

        // No new events, yet user 3 is retried from the queue.
        let second = progression.run_cycle(100).expect("cycle");
        assert_eq!(second.events_claimed, 0);
        assert_eq!(second.evaluations_failed, 0);
        let keys: Vec<_> = second
            .unlocks
            .iter()
            .map(|(user, u)| (*user, u.achievement.as_str()))
            .collect();
        assert_eq!(keys, vec![(UserId(3), "boss_hunter")]);
        assert!(progression.tracker().pending_users(10).expect("queue").is_empty());

        let idle = progression.run_cycle(100).expect("cycle");
        assert_eq!(idle, CycleReport::default());
    }

    #[test]
    fn aggregation_queues_touched_users() {
        let store = Arc::new(Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open"));
        let dispatcher = EventDispatcher::new(store.clone());
        let progression = Progression::new(store, Arc::new(AchievementCatalog::builtin()));

        dispatcher
            .log_event(&NewEvent::new(EventKind::Kill, UserId(9), 1.0))
            .expect("log");
        progression.aggregator().run_once(100).expect("batch");
        assert_eq!(progression.tracker().pending_users(10).expect("queue"), vec![UserId(9)]);

        // Evaluating a subset of the catalog leaves the user queued.
        progression.tracker().evaluate(UserId(9), &[]).expect("subset");
        assert_eq!(progression.tracker().pending_users(10).expect("queue"), vec![UserId(9)]);

        progression.tracker().evaluate_user(UserId(9)).expect("full");
        assert!(progression.tracker().pending_users(10).expect("queue").is_empty());
    }
}
