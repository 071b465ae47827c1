//! Parry timing engine.
//!
//! A parry window is a per-user state machine:
//!
//! ```text
//! NONE ──activate──▶ ACTIVE ──resolve──▶ PERFECT | SUCCESS | FAILED (late)
//!                      │
//!                      ├──expire (stale)──▶ FAILED
//!                      └──cancel─────────▶ CANCELLED
//! ```
//!
//! Every transition runs in one unit of work together with its statistics
//! update, its progression event and its telemetry record, so either all of
//! them happen or none do.
//!
//! Concurrency: at most one ACTIVE row per user is a storage constraint
//! (partial unique index), and activation is an `INSERT … ON CONFLICT DO
//! NOTHING` against it. Terminal transitions are conditional updates on
//! `status = 'active'`, so a duplicate or racing caller changes zero rows and
//! never applies a second statistics update.
//!
//! Expiry is lazy. Every path that reads a window first runs [`ParryEngine::heal`]
//! on it, so a window past `expires_at` is never acted on as active.

pub mod statistics;
pub mod timing;
pub mod window;

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::ParryConfig;
use crate::error::{Result, ValidationError};
use crate::events::{EventDispatcher, EventKind, NewEvent};
use crate::store::{Store, UnitOfWork};
use crate::telemetry::TelemetryRecord;
use crate::types::{TargetId, UserId, WindowId, elapsed_ms, to_millis};

pub use statistics::ParryStatistics;
pub use timing::{Mitigation, Timing, classify, counter_multiplier, mitigation};
pub use window::{ParryWindow, WindowStatus};

/// Result of [`ParryEngine::activate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationOutcome {
    /// The user's active window.
    pub window: ParryWindow,
    /// `false` when an already-active window was returned instead of a new one.
    pub created: bool,
}

/// Result of [`ParryEngine::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    /// The window after its terminal transition.
    pub window: ParryWindow,
    /// PERFECT, SUCCESS, or FAILED for a late attack.
    pub status: WindowStatus,
    /// Damage passed through to the defender.
    pub damage_taken: f64,
    /// Damage negated.
    pub damage_avoided: f64,
    /// Attack time minus activation.
    pub reaction_ms: i64,
}

/// Result of [`ParryEngine::expire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpireOutcome {
    /// This call moved the window to FAILED.
    Expired(ParryWindow),
    /// Not yet past `expires_at`; nothing changed.
    StillActive(ParryWindow),
    /// Already terminal; nothing changed.
    AlreadyTerminal(ParryWindow),
}

impl ExpireOutcome {
    /// The window as it is after the call.
    #[must_use]
    pub fn window(&self) -> &ParryWindow {
        match self {
            Self::Expired(w) | Self::StillActive(w) | Self::AlreadyTerminal(w) => w,
        }
    }
}

/// Result of [`ParryEngine::counterattack`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterOutcome {
    /// Damage multiplier for the counter hit.
    pub multiplier: f64,
    /// `false` when an earlier call already recorded the counter.
    pub recorded: bool,
    /// Whether the counter landed inside the bonus window.
    pub bonus: bool,
}

/// Per-user defensive-window state machine over a shared [`Store`].
pub struct ParryEngine {
    store: Arc<Store>,
    config: ParryConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ParryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ParryEngine {
    /// Engine on the system clock.
    ///
    /// # Errors
    ///
    /// Returns `RiposteError::Config` if `config` is invalid.
    pub fn new(store: Arc<Store>, config: ParryConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Engine on an injected clock.
    ///
    /// # Errors
    ///
    /// Returns `RiposteError::Config` if `config` is invalid.
    pub fn with_clock(store: Arc<Store>, config: ParryConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config, clock })
    }

    /// Timing configuration in use.
    #[must_use]
    pub fn config(&self) -> &ParryConfig {
        &self.config
    }

    /// Current instant of the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Raise a window for `user` against `target`.
    ///
    /// If the user already has a live window it is returned with
    /// `created = false`; a stale one is expired first and replaced.
    ///
    /// # Errors
    ///
    /// Returns a persistence error; nothing is written in that case.
    pub fn activate(&self, user: UserId, target: TargetId) -> Result<ActivationOutcome> {
        // Storage keeps milliseconds; the returned window must match the row.
        let now = self.clock.now().trunc_subsecs(3);
        let outcome = self.store.transaction(|uow| {
            if let Some(existing) = window::load_active(uow.conn(), user)? {
                let existing = self.heal(uow, existing, now)?;
                if existing.status == WindowStatus::Active {
                    return Ok(ActivationOutcome {
                        window: existing,
                        created: false,
                    });
                }
            }

            let candidate = ParryWindow {
                id: WindowId::new(),
                user,
                target,
                activated_at: now,
                expires_at: now + Duration::milliseconds(self.config.window_ms),
                status: WindowStatus::Active,
                reaction_ms: None,
                damage_in: None,
                damage_taken: None,
                resolved_at: None,
                counter_at: None,
                counter_multiplier: None,
            };

            if window::insert_active(uow.conn(), &candidate)? {
                uow.count(|c| &c.windows_activated, 1);
                uow.emit(
                    telemetry(&candidate, "parry_activated", now)
                        .with_meta("expires_at_ms", to_millis(candidate.expires_at)),
                );
                return Ok(ActivationOutcome {
                    window: candidate,
                    created: true,
                });
            }

            // The partial unique index turned the insert into a no-op.
            let existing = window::load_active(uow.conn(), user)?.ok_or(ValidationError::NoActiveWindow(user))?;
            Ok(ActivationOutcome {
                window: existing,
                created: false,
            })
        })?;

        debug!(
            user = %user,
            window = %outcome.window.id,
            created = outcome.created,
            "Parry window activated"
        );
        Ok(outcome)
    }

    /// Resolve an incoming attack against the user's active window.
    ///
    /// The window is healed against the engine clock first: if it is already
    /// stale it is expired (and that expiry commits) and the call reports
    /// [`ValidationError::NoActiveWindow`]. Otherwise `attack_time` is
    /// authoritative: the reaction is measured from activation to the attack,
    /// and an attack past `expires_at` fails the window in this same call
    /// (status FAILED, full damage taken).
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for non-finite or negative damage, no
    /// active window, a target mismatch, or an attack before activation.
    /// Apart from the expiry of a stale window, nothing is written in those
    /// cases.
    pub fn resolve(
        &self,
        user: UserId,
        target: TargetId,
        incoming_damage: f64,
        attack_time: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        if !incoming_damage.is_finite() || incoming_damage < 0.0 {
            return Err(ValidationError::InvalidDamage(incoming_damage).into());
        }

        let now = self.clock.now();
        let outcome = self.store.transaction(|uow| {
            let found = window::load_active(uow.conn(), user)?.ok_or(ValidationError::NoActiveWindow(user))?;
            let active = self.heal(uow, found, now)?;
            if active.status != WindowStatus::Active {
                // Expired on read: commit the expiry, then report no window.
                return Ok(None);
            }
            if active.target != target {
                return Err(ValidationError::TargetMismatch {
                    window: active.id,
                    expected: active.target,
                    actual: target,
                }
                .into());
            }

            let reaction_ms = elapsed_ms(active.activated_at, attack_time);
            if attack_time < active.activated_at {
                return Err(ValidationError::NegativeReactionTime {
                    reaction_ms: reaction_ms.min(-1),
                }
                .into());
            }

            let timing = classify(reaction_ms, &self.config);
            let split = mitigation(timing, incoming_damage, &self.config);
            let status = match timing {
                Timing::Perfect => WindowStatus::Perfect,
                Timing::Standard => WindowStatus::Success,
                Timing::Late => WindowStatus::Failed,
            };

            let changed = uow.conn().execute(
                "UPDATE parry_windows
                 SET status = ?2, reaction_ms = ?3, damage_in = ?4, damage_taken = ?5, resolved_at = ?6
                 WHERE id = ?1 AND status = 'active'",
                rusqlite::params![
                    active.id,
                    status.as_str(),
                    reaction_ms,
                    incoming_damage,
                    split.damage_taken,
                    to_millis(attack_time)
                ],
            )?;
            if changed == 0 {
                return Err(ValidationError::WindowTerminal {
                    id: active.id,
                    status: "resolved".into(),
                }
                .into());
            }

            let resolved = window::load(uow.conn(), active.id)?.ok_or(ValidationError::WindowNotFound(active.id))?;
            match timing {
                Timing::Perfect | Timing::Standard => {
                    let perfect = timing == Timing::Perfect;
                    statistics::record_parry(
                        uow.conn(),
                        user,
                        perfect,
                        reaction_ms,
                        split.damage_avoided,
                        split.damage_taken,
                        attack_time,
                    )?;
                    EventDispatcher::log_in(
                        uow,
                        &NewEvent::new(EventKind::ParrySuccess, user, split.damage_avoided)
                            .with("perfect", perfect)
                            .with("reaction_ms", reaction_ms)
                            .with("target", target.0)
                            .at(attack_time),
                    )?;
                    if perfect {
                        uow.count(|c| &c.parries_perfect, 1);
                    } else {
                        uow.count(|c| &c.parries_success, 1);
                    }
                    let kind = if perfect { "parry_perfect" } else { "parry_success" };
                    uow.emit(
                        telemetry(&resolved, kind, attack_time)
                            .with_reaction_ms(reaction_ms)
                            .with_damage(incoming_damage)
                            .with_meta("damage_avoided", split.damage_avoided),
                    );
                }
                Timing::Late => {
                    statistics::record_failure(uow.conn(), user, split.damage_taken, attack_time)?;
                    EventDispatcher::log_in(
                        uow,
                        &NewEvent::new(EventKind::ParryFailed, user, split.damage_taken)
                            .with("reason", "late")
                            .with("target", target.0)
                            .at(attack_time),
                    )?;
                    uow.count(|c| &c.parries_failed, 1);
                    uow.emit(
                        telemetry(&resolved, "parry_failed", attack_time)
                            .with_reaction_ms(reaction_ms)
                            .with_damage(incoming_damage)
                            .with_meta("reason", "late"),
                    );
                }
            }

            Ok(Some(ResolveOutcome {
                window: resolved,
                status,
                damage_taken: split.damage_taken,
                damage_avoided: split.damage_avoided,
                reaction_ms,
            }))
        })?;
        let Some(outcome) = outcome else {
            return Err(ValidationError::NoActiveWindow(user).into());
        };

        info!(
            user = %user,
            window = %outcome.window.id,
            status = %outcome.status,
            reaction_ms = outcome.reaction_ms,
            damage_taken = outcome.damage_taken,
            "Parry resolved"
        );
        Ok(outcome)
    }

    /// Fail `id` if it is still active and past its expiry.
    ///
    /// Duplicate and concurrent calls are safe: only the call whose
    /// conditional update changed the row resets the streak.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WindowNotFound`] for an unknown id, or a
    /// persistence error.
    pub fn expire(&self, id: WindowId) -> Result<ExpireOutcome> {
        let now = self.clock.now();
        self.store.transaction(|uow| self.expire_in(uow, id, now))
    }

    /// Record a counterattack after a successful parry and return its
    /// multiplier. Only the first call per window records anything.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an unknown window, a window that was
    /// not parried, or a counter before the parry resolved.
    pub fn counterattack(&self, id: WindowId, counter_time: DateTime<Utc>) -> Result<CounterOutcome> {
        let now = self.clock.now();
        self.store.transaction(|uow| {
            let found = window::load(uow.conn(), id)?.ok_or(ValidationError::WindowNotFound(id))?;
            let parried = self.heal(uow, found, now)?;
            if !parried.status.is_parried() {
                return Err(ValidationError::NotCounterable {
                    id,
                    status: parried.status.to_string(),
                }
                .into());
            }
            let resolved_at = parried.resolved_at.ok_or_else(|| ValidationError::NotCounterable {
                id,
                status: parried.status.to_string(),
            })?;
            let perfect = parried.status == WindowStatus::Perfect;

            if let (Some(multiplier), Some(at)) = (parried.counter_multiplier, parried.counter_at) {
                return Ok(CounterOutcome {
                    multiplier,
                    recorded: false,
                    bonus: elapsed_ms(resolved_at, at) <= self.config.counter_window_ms,
                });
            }

            let since = elapsed_ms(resolved_at, counter_time);
            if counter_time < resolved_at {
                return Err(ValidationError::CounterBeforeResolution(id).into());
            }
            let multiplier = counter_multiplier(perfect, since, &self.config);
            let bonus = since <= self.config.counter_window_ms;

            let changed = uow.conn().execute(
                "UPDATE parry_windows SET counter_at = ?2, counter_multiplier = ?3
                 WHERE id = ?1 AND counter_at IS NULL",
                rusqlite::params![id, to_millis(counter_time), multiplier],
            )?;
            if changed == 0 {
                return Ok(CounterOutcome {
                    multiplier,
                    recorded: false,
                    bonus,
                });
            }

            statistics::record_counter(uow.conn(), parried.user, bonus, counter_time)?;
            EventDispatcher::log_in(
                uow,
                &NewEvent::new(EventKind::Counterattack, parried.user, multiplier)
                    .with("bonus", bonus)
                    .with("perfect", perfect)
                    .at(counter_time),
            )?;
            uow.count(|c| &c.counterattacks, 1);
            uow.emit(
                telemetry(&parried, "parry_counterattack", counter_time)
                    .with_multiplier(multiplier)
                    .with_meta("bonus", bonus)
                    .with_meta("since_parry_ms", since),
            );
            debug!(window = %id, multiplier, bonus, "Counterattack recorded");
            Ok(CounterOutcome {
                multiplier,
                recorded: true,
                bonus,
            })
        })
    }

    /// Drop the user's active window (stun, leaving combat, disconnect).
    ///
    /// Returns the cancelled window, or `None` if there was nothing live to
    /// cancel. A stale window is expired rather than cancelled.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn cancel(&self, user: UserId) -> Result<Option<ParryWindow>> {
        let now = self.clock.now();
        self.store.transaction(|uow| {
            let Some(active) = window::load_active(uow.conn(), user)? else {
                return Ok(None);
            };
            let active = self.heal(uow, active, now)?;
            if active.status != WindowStatus::Active {
                return Ok(None);
            }

            let changed = uow.conn().execute(
                "UPDATE parry_windows SET status = 'cancelled', resolved_at = ?2
                 WHERE id = ?1 AND status = 'active'",
                rusqlite::params![active.id, to_millis(now)],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            statistics::record_cancel(uow.conn(), user, now)?;
            uow.count(|c| &c.windows_cancelled, 1);
            let cancelled = window::load(uow.conn(), active.id)?;
            if let Some(w) = &cancelled {
                uow.emit(telemetry(w, "parry_cancelled", now));
            }
            Ok(cancelled)
        })
    }

    // ------------------------------------------------------------------
    // Reads (self-healing)
    // ------------------------------------------------------------------

    /// The user's live window, if any.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn active_window(&self, user: UserId) -> Result<Option<ParryWindow>> {
        let now = self.clock.now();
        self.store.transaction(|uow| {
            let Some(active) = window::load_active(uow.conn(), user)? else {
                return Ok(None);
            };
            let healed = self.heal(uow, active, now)?;
            Ok((healed.status == WindowStatus::Active).then_some(healed))
        })
    }

    /// One window by id, healed if stale.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn window(&self, id: WindowId) -> Result<Option<ParryWindow>> {
        let now = self.clock.now();
        self.store.transaction(|uow| {
            window::load(uow.conn(), id)?
                .map(|w| self.heal(uow, w, now))
                .transpose()
        })
    }

    /// Parry record of `user`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn statistics(&self, user: UserId) -> Result<ParryStatistics> {
        self.store.read(|conn| statistics::load(conn, user))
    }

    /// Newest-first audit trail of the user's windows.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn history(&self, user: UserId, limit: usize) -> Result<Vec<ParryWindow>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.read(|conn| window::history(conn, user, limit))
    }

    /// Expire up to `limit` stale windows across all users. Returns how many
    /// this call expired.
    ///
    /// # Errors
    ///
    /// Returns a persistence error; no window is expired in that case.
    pub fn sweep_expired(&self, limit: usize) -> Result<usize> {
        let now = self.clock.now();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let expired = self.store.transaction(|uow| {
            let mut expired = 0;
            for id in window::stale_ids(uow.conn(), now, limit)? {
                if matches!(self.expire_in(uow, id, now)?, ExpireOutcome::Expired(_)) {
                    expired += 1;
                }
            }
            Ok(expired)
        })?;
        if expired > 0 {
            info!(expired, "Stale parry windows swept");
        }
        Ok(expired)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Expiry check every read path runs before acting on a window.
    ///
    /// Returns the window unchanged unless it is ACTIVE and past
    /// `expires_at`, in which case it is failed inside `uow` and the updated
    /// row is returned.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn heal(&self, uow: &mut UnitOfWork<'_>, window: ParryWindow, now: DateTime<Utc>) -> Result<ParryWindow> {
        if !window.is_stale(now) {
            return Ok(window);
        }
        Ok(match self.expire_in(uow, window.id, now)? {
            ExpireOutcome::Expired(w) | ExpireOutcome::StillActive(w) | ExpireOutcome::AlreadyTerminal(w) => w,
        })
    }

    fn expire_in(&self, uow: &mut UnitOfWork<'_>, id: WindowId, now: DateTime<Utc>) -> Result<ExpireOutcome> {
        let current = window::load(uow.conn(), id)?.ok_or(ValidationError::WindowNotFound(id))?;
        if current.status.is_terminal() {
            return Ok(ExpireOutcome::AlreadyTerminal(current));
        }

        let changed = uow.conn().execute(
            "UPDATE parry_windows SET status = 'failed', resolved_at = ?2
             WHERE id = ?1 AND status = 'active' AND expires_at < ?2",
            rusqlite::params![id, to_millis(now)],
        )?;
        if changed == 0 {
            let after = window::load(uow.conn(), id)?.ok_or(ValidationError::WindowNotFound(id))?;
            return Ok(if after.status == WindowStatus::Active {
                ExpireOutcome::StillActive(after)
            } else {
                ExpireOutcome::AlreadyTerminal(after)
            });
        }

        statistics::record_failure(uow.conn(), current.user, 0.0, now)?;
        EventDispatcher::log_in(
            uow,
            &NewEvent::new(EventKind::ParryFailed, current.user, 0.0)
                .with("reason", "expired")
                .with("target", current.target.0)
                .at(now),
        )?;
        uow.count(|c| &c.parries_failed, 1);

        let expired = window::load(uow.conn(), id)?.ok_or(ValidationError::WindowNotFound(id))?;
        uow.emit(
            telemetry(&expired, "parry_expired", now)
                .with_meta("overdue_ms", elapsed_ms(expired.expires_at, now)),
        );
        debug!(user = %expired.user, window = %id, "Stale parry window expired");
        Ok(ExpireOutcome::Expired(expired))
    }
}

fn telemetry(window: &ParryWindow, event_type: &str, at: DateTime<Utc>) -> TelemetryRecord {
    TelemetryRecord::new(window.user, event_type, window.id.to_string(), at).with_meta("target", window.target.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PersistenceConfig;
    use crate::error::RiposteError;
    use crate::telemetry::MemorySink;
    use chrono::TimeZone;

    struct Fixture {
        engine: ParryEngine,
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
        store: Arc<Store>,
        t0: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        fixture_at(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date"))
    }

    fn fixture_at(t0: DateTime<Utc>) -> Fixture {
        let clock = Arc::new(ManualClock::new(t0));
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(Store::open_in_memory(&PersistenceConfig::default(), sink.clone()).expect("open"));
        let engine = ParryEngine::with_clock(store.clone(), ParryConfig::default(), clock.clone()).expect("engine");
        Fixture {
            engine,
            clock,
            sink,
            store,
            t0,
        }
    }

    fn at(t0: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
        t0 + Duration::milliseconds(ms)
    }

    fn validation(err: RiposteError) -> ValidationError {
        match err {
            RiposteError::Validation(v) => v,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn activate_is_idempotent_while_live() {
        let f = fixture();
        let first = f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        let second = f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.window.id, second.window.id);
        assert_eq!(f.store.counters().snapshot().windows_activated, 1);
        assert_eq!(f.sink.of_type("parry_activated").len(), 1);
    }

    #[test]
    fn stale_window_is_replaced_on_activate() {
        let f = fixture();
        let first = f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        f.clock.advance_ms(2600);
        let second = f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        assert!(second.created);
        assert_ne!(first.window.id, second.window.id);

        let old = f.engine.window(first.window.id).expect("read").expect("exists");
        assert_eq!(old.status, WindowStatus::Failed);
        assert_eq!(f.engine.statistics(UserId(1)).expect("stats").failures, 1);
    }

    #[test]
    fn perfect_resolution() {
        let f = fixture();
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        let out = f.engine.resolve(UserId(1), TargetId(9), 100.0, at(f.t0, 250)).expect("resolve");
        assert_eq!(out.status, WindowStatus::Perfect);
        assert!(out.damage_taken.abs() < 1e-9);
        assert!((out.damage_avoided - 100.0).abs() < 1e-9);
        assert_eq!(out.reaction_ms, 250);

        let stats = f.engine.statistics(UserId(1)).expect("stats");
        assert_eq!((stats.attempts, stats.perfects, stats.current_streak), (1, 1, 1));
        assert_eq!(f.sink.of_type("parry_perfect").len(), 1);
        assert!(f.engine.active_window(UserId(1)).expect("read").is_none());
    }

    #[test]
    fn standard_resolution_passes_remainder() {
        let f = fixture();
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        let out = f.engine.resolve(UserId(1), TargetId(9), 100.0, at(f.t0, 1500)).expect("resolve");
        assert_eq!(out.status, WindowStatus::Success);
        assert!((out.damage_taken - 25.0).abs() < 1e-9);
        assert!((out.damage_avoided - 75.0).abs() < 1e-9);
    }

    #[test]
    fn late_resolution_fails_the_window() {
        let f = fixture();
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        f.engine.resolve(UserId(1), TargetId(9), 10.0, at(f.t0, 100)).expect("first parry");
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");

        let out = f.engine.resolve(UserId(1), TargetId(9), 40.0, at(f.t0, 2600)).expect("resolve");
        assert_eq!(out.status, WindowStatus::Failed);
        assert!((out.damage_taken - 40.0).abs() < 1e-9);

        let stats = f.engine.statistics(UserId(1)).expect("stats");
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.best_streak, 1);
    }

    #[test]
    fn invalid_resolutions_write_nothing() {
        let f = fixture();
        assert_eq!(
            validation(f.engine.resolve(UserId(1), TargetId(9), 10.0, f.t0).expect_err("no window")),
            ValidationError::NoActiveWindow(UserId(1))
        );

        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        assert!(matches!(
            validation(f.engine.resolve(UserId(1), TargetId(4), 10.0, f.t0).expect_err("wrong target")),
            ValidationError::TargetMismatch { .. }
        ));
        assert_eq!(
            validation(f.engine.resolve(UserId(1), TargetId(9), 10.0, at(f.t0, -5)).expect_err("early")),
            ValidationError::NegativeReactionTime { reaction_ms: -5 }
        );
        assert!(matches!(
            validation(f.engine.resolve(UserId(1), TargetId(9), f64::NAN, f.t0).expect_err("nan")),
            ValidationError::InvalidDamage(_)
        ));

        let still = f.engine.active_window(UserId(1)).expect("read").expect("live");
        assert_eq!(still.id, w.id);
        assert_eq!(f.engine.statistics(UserId(1)).expect("stats").attempts, 0);
    }

    #[test]
    fn stale_window_cannot_be_resolved() {
        let f = fixture();
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        f.clock.advance_ms(10_000);

        // The attack timestamp is inside the window, but the row is stale
        // when read, so it is expired rather than parried.
        assert_eq!(
            validation(f.engine.resolve(UserId(1), TargetId(9), 100.0, at(f.t0, 1000)).expect_err("stale")),
            ValidationError::NoActiveWindow(UserId(1))
        );

        let stored = f.engine.window(w.id).expect("read").expect("exists");
        assert_eq!(stored.status, WindowStatus::Failed);
        let stats = f.engine.statistics(UserId(1)).expect("stats");
        assert_eq!((stats.attempts, stats.successes, stats.failures), (1, 0, 1));
        assert_eq!(f.sink.of_type("parry_expired").len(), 1);
        assert!(f.sink.of_type("parry_success").is_empty());
    }

    #[test]
    fn activation_time_is_stored_precision() {
        let t0 = Utc.timestamp_opt(1_772_366_400, 700_000).single().expect("valid instant");
        let f = fixture_at(t0);
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;

        let stored = f.engine.window(w.id).expect("read").expect("exists");
        assert_eq!(w.activated_at, stored.activated_at);
        assert_eq!(w.expires_at, stored.expires_at);

        // Half a millisecond before activation is still before activation.
        let early = w.activated_at - Duration::microseconds(500);
        assert!(matches!(
            validation(f.engine.resolve(UserId(1), TargetId(9), 10.0, early).expect_err("early")),
            ValidationError::NegativeReactionTime { reaction_ms } if reaction_ms < 0
        ));
        assert_eq!(f.engine.statistics(UserId(1)).expect("stats").attempts, 0);
    }

    #[test]
    fn expire_is_a_noop_until_stale_and_after_terminal() {
        let f = fixture();
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        assert!(matches!(f.engine.expire(w.id).expect("expire"), ExpireOutcome::StillActive(_)));

        f.clock.advance_ms(2501);
        assert!(matches!(f.engine.expire(w.id).expect("expire"), ExpireOutcome::Expired(_)));
        assert!(matches!(f.engine.expire(w.id).expect("again"), ExpireOutcome::AlreadyTerminal(_)));

        let stats = f.engine.statistics(UserId(1)).expect("stats");
        assert_eq!(stats.failures, 1);
        assert_eq!(f.sink.of_type("parry_expired").len(), 1);
    }

    #[test]
    fn expire_on_resolved_window_changes_nothing() {
        let f = fixture();
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        f.engine.resolve(UserId(1), TargetId(9), 10.0, at(f.t0, 400)).expect("resolve");
        f.clock.advance_ms(10_000);
        let out = f.engine.expire(w.id).expect("expire");
        assert_eq!(out.window().status, WindowStatus::Success);
        assert_eq!(f.engine.statistics(UserId(1)).expect("stats").current_streak, 1);
    }

    #[test]
    fn counter_records_once() {
        let f = fixture();
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        f.engine.resolve(UserId(1), TargetId(9), 50.0, at(f.t0, 200)).expect("resolve");

        let first = f.engine.counterattack(w.id, at(f.t0, 700)).expect("counter");
        assert!(first.recorded);
        assert!(first.bonus);
        assert!((first.multiplier - 2.0).abs() < f64::EPSILON);

        let again = f.engine.counterattack(w.id, at(f.t0, 5000)).expect("counter");
        assert!(!again.recorded);
        assert!((again.multiplier - 2.0).abs() < f64::EPSILON);

        let stats = f.engine.statistics(UserId(1)).expect("stats");
        assert_eq!((stats.counterattacks, stats.counter_bonus_hits), (1, 1));
    }

    #[test]
    fn counter_after_bonus_window_is_neutral() {
        let f = fixture();
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        f.engine.resolve(UserId(1), TargetId(9), 50.0, at(f.t0, 1000)).expect("resolve");
        let out = f.engine.counterattack(w.id, at(f.t0, 2500)).expect("counter");
        assert!(!out.bonus);
        assert!((out.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counter_requires_a_parry() {
        let f = fixture();
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        assert!(matches!(
            validation(f.engine.counterattack(w.id, f.t0).expect_err("active")),
            ValidationError::NotCounterable { .. }
        ));
        f.engine.resolve(UserId(1), TargetId(9), 50.0, at(f.t0, 500)).expect("resolve");
        assert_eq!(
            validation(f.engine.counterattack(w.id, at(f.t0, 499)).expect_err("early")),
            ValidationError::CounterBeforeResolution(w.id)
        );
    }

    #[test]
    fn cancel_leaves_streak_alone() {
        let f = fixture();
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        f.engine.resolve(UserId(1), TargetId(9), 10.0, at(f.t0, 400)).expect("resolve");
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");

        let cancelled = f.engine.cancel(UserId(1)).expect("cancel").expect("was live");
        assert_eq!(cancelled.status, WindowStatus::Cancelled);
        assert!(f.engine.cancel(UserId(1)).expect("cancel").is_none());

        let stats = f.engine.statistics(UserId(1)).expect("stats");
        assert_eq!((stats.current_streak, stats.cancels), (1, 1));
    }

    #[test]
    fn sweep_expires_only_stale_windows() {
        let f = fixture();
        f.engine.activate(UserId(1), TargetId(9)).expect("activate");
        f.clock.advance_ms(2000);
        f.engine.activate(UserId(2), TargetId(9)).expect("activate");
        f.clock.advance_ms(1000);

        assert_eq!(f.engine.sweep_expired(100).expect("sweep"), 1);
        assert!(f.engine.active_window(UserId(1)).expect("read").is_none());
        assert!(f.engine.active_window(UserId(2)).expect("read").is_some());
        assert_eq!(f.engine.sweep_expired(100).expect("sweep"), 0);
    }

    #[test]
    fn transitions_log_progression_events() {
        let f = fixture();
        let dispatcher = EventDispatcher::new(f.store.clone());
        let w = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        f.engine.resolve(UserId(1), TargetId(9), 80.0, at(f.t0, 100)).expect("resolve");
        f.engine.counterattack(w.id, at(f.t0, 300)).expect("counter");

        let kinds: Vec<_> = dispatcher
            .read_unprocessed(10)
            .expect("read")
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::ParrySuccess, EventKind::Counterattack]);
    }

    #[test]
    fn history_is_newest_first() {
        let f = fixture();
        let first = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;
        f.engine.cancel(UserId(1)).expect("cancel");
        f.clock.advance_ms(10);
        let second = f.engine.activate(UserId(1), TargetId(9)).expect("activate").window;

        let ids: Vec<_> = f.engine.history(UserId(1), 10).expect("history").iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
