//! Periodic progression worker.
//!
//! Each tick sweeps stale parry windows, runs one aggregation cycle (which
//! also evaluates achievements for touched users), and purges consumed events
//! past retention. Ticks run on the blocking pool because the store is
//! synchronous SQLite.
//!
//! A second, slower timer takes rotating database backups when the
//! persistence section enables them. Shutdown runs a final tick, then a final
//! backup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use riposte_core::config::RiposteConfig;
use riposte_core::events::EventDispatcher;
use riposte_core::parry::ParryEngine;
use riposte_core::progression::{CycleReport, Progression};
use riposte_core::store::Store;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{GameError, Result};

/// Worker tuning, usually derived from [`RiposteConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Maximum events per aggregation cycle.
    pub batch_size: usize,
    /// Maximum stale windows expired per tick.
    pub sweep_limit: usize,
    /// Consumed events older than this many days are purged. 0 keeps them.
    pub retention_days: u32,
    /// Time between rotating backups. `None` disables them.
    pub backup_interval: Option<Duration>,
}

impl WorkerConfig {
    /// Derive from the aggregation and persistence sections.
    #[must_use]
    pub fn from_config(config: &RiposteConfig) -> Self {
        let persistence = &config.persistence;
        let backup_interval = (persistence.backup_count > 0 && persistence.backup_interval_secs > 0)
            .then(|| Duration::from_secs(persistence.backup_interval_secs));
        Self {
            interval: Duration::from_millis(config.aggregation.interval_ms.max(1)),
            batch_size: config.aggregation.batch_size,
            sweep_limit: config.aggregation.batch_size,
            retention_days: config.aggregation.retention_days,
            backup_interval,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Stale windows expired.
    pub windows_expired: usize,
    /// Aggregation and evaluation results.
    pub cycle: CycleReport,
    /// Consumed events deleted.
    pub events_purged: usize,
}

/// Drives sweeping, aggregation and evaluation on an interval.
#[derive(Debug)]
pub struct ProgressionWorker {
    store: Arc<Store>,
    engine: Arc<ParryEngine>,
    progression: Arc<Progression>,
    dispatcher: EventDispatcher,
    config: WorkerConfig,
}

impl ProgressionWorker {
    /// Build a worker over shared components.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        engine: Arc<ParryEngine>,
        progression: Arc<Progression>,
        dispatcher: EventDispatcher,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            progression,
            dispatcher,
            config,
        }
    }

    /// Run one tick synchronously.
    ///
    /// # Errors
    ///
    /// Returns the first core error; earlier steps of the tick stay
    /// committed.
    pub fn tick(&self) -> Result<TickReport> {
        let windows_expired = self.engine.sweep_expired(self.config.sweep_limit)?;
        let cycle = self.progression.run_cycle(self.config.batch_size)?;
        let events_purged = if self.config.retention_days == 0 {
            0
        } else {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.retention_days));
            self.dispatcher.purge_processed(cutoff)?
        };
        Ok(TickReport {
            windows_expired,
            cycle,
            events_purged,
        })
    }

    /// Run one tick on the blocking pool.
    ///
    /// # Errors
    ///
    /// As [`ProgressionWorker::tick`], or [`GameError::WorkerJoin`] if the
    /// blocking task panicked.
    pub async fn tick_blocking(self: &Arc<Self>) -> Result<TickReport> {
        let worker = Arc::clone(self);
        tokio::task::spawn_blocking(move || worker.tick())
            .await
            .map_err(GameError::WorkerJoin)?
    }

    /// Take one rotating backup synchronously.
    ///
    /// # Errors
    ///
    /// Returns the store's persistence or I/O error.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        Ok(self.store.create_rotating_backup()?)
    }

    /// Take one rotating backup on the blocking pool.
    ///
    /// # Errors
    ///
    /// As [`ProgressionWorker::backup`], or [`GameError::WorkerJoin`] if the
    /// blocking task panicked.
    pub async fn backup_blocking(self: &Arc<Self>) -> Result<Option<PathBuf>> {
        let worker = Arc::clone(self);
        tokio::task::spawn_blocking(move || worker.backup())
            .await
            .map_err(GameError::WorkerJoin)?
    }

    /// Spawn [`ProgressionWorker::run`] on the current runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Tick until `shutdown` turns `true` or its sender is dropped, then run
    /// one final tick so events reported before shutdown are folded in, and
    /// one final backup if backups are enabled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            backup_interval_secs = self.config.backup_interval.map(|d| d.as_secs()),
            "Progression worker started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first backup waits one full period; the disabled arm never polls.
        let backup_period = self.config.backup_interval.unwrap_or(self.config.interval);
        let mut backup_ticker = tokio::time::interval_at(Instant::now() + backup_period, backup_period);
        backup_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let backups = self.config.backup_interval.is_some();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.log_tick(self.tick_blocking().await),
                _ = backup_ticker.tick(), if backups => log_backup(self.backup_blocking().await),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Finalizing progression worker...");
        self.log_tick(self.tick_blocking().await);
        if backups {
            log_backup(self.backup_blocking().await);
        }
        info!("Progression worker stopped");
    }

    fn log_tick(&self, result: Result<TickReport>) {
        match result {
            Ok(report) if report.cycle.evaluations_failed > 0 => warn!(
                failed = report.cycle.evaluations_failed,
                evaluated = report.cycle.users_evaluated,
                "Progression tick left users queued for evaluation"
            ),
            Ok(report) => debug!(
                expired = report.windows_expired,
                events = report.cycle.events_claimed,
                unlocks = report.cycle.unlocks.len(),
                purged = report.events_purged,
                "Progression tick"
            ),
            Err(err) if err.is_retryable() => warn!(error = %err, "Progression tick hit a busy database, retrying next tick"),
            Err(err) => error!(error = %err, "Progression tick failed"),
        }
    }
}

fn log_backup(result: Result<Option<PathBuf>>) {
    match result {
        Ok(Some(path)) => info!(path = %path.display(), "Rotating backup written"),
        Ok(None) => debug!("Rotating backup skipped"),
        Err(err) => error!(error = %err, "Rotating backup failed"),
    }
}
