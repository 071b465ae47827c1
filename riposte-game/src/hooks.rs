//! Integration hooks for the host game's combat and economy systems.
//!
//! The host calls these from its command layer. They translate combat calls
//! into parry-engine transitions and gameplay facts into event-log entries;
//! nothing here writes stats or achievements directly.

use chrono::{DateTime, Utc};
use riposte_core::error::ValidationError;
use riposte_core::events::{EventDispatcher, EventKind, NewEvent};
use riposte_core::parry::{ActivationOutcome, ParryEngine, WindowStatus};
use riposte_core::types::{EventId, TargetId, UserId, WindowId};
use riposte_core::RiposteError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// An attack about to land on a player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IncomingAttack {
    /// Who is attacking.
    pub attacker: TargetId,
    /// Who is being hit.
    pub defender: UserId,
    /// Raw damage before mitigation.
    pub damage: f64,
    /// Server timestamp of the hit.
    pub at: DateTime<Utc>,
}

/// How an [`IncomingAttack`] played out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    /// Damage the host should apply to the defender.
    pub damage_applied: f64,
    /// Window that handled the attack, if one did.
    pub window: Option<WindowId>,
    /// Final window status, `None` when no window applied.
    pub status: Option<WindowStatus>,
}

impl AttackResult {
    fn unparried(attack: &IncomingAttack) -> Self {
        Self {
            damage_applied: attack.damage,
            window: None,
            status: None,
        }
    }

    /// Whether the hit was parried (standard or perfect).
    #[must_use]
    pub fn parried(&self) -> bool {
        self.status.is_some_and(WindowStatus::is_parried)
    }
}

/// Player pressed parry facing `target`.
///
/// # Errors
///
/// Returns the core error if the window could not be stored.
pub fn on_parry_input(engine: &ParryEngine, user: UserId, target: TargetId) -> Result<ActivationOutcome> {
    Ok(engine.activate(user, target)?)
}

/// An attack reaches a player.
///
/// Without a live window against this attacker the hit lands in full. That
/// is ordinary combat, not an error.
///
/// # Errors
///
/// Returns the core error for invalid damage or storage failure.
pub fn on_incoming_attack(engine: &ParryEngine, attack: &IncomingAttack) -> Result<AttackResult> {
    match engine.resolve(attack.defender, attack.attacker, attack.damage, attack.at) {
        Ok(outcome) => Ok(AttackResult {
            damage_applied: outcome.damage_taken,
            window: Some(outcome.window.id),
            status: Some(outcome.status),
        }),
        Err(RiposteError::Validation(
            ValidationError::NoActiveWindow(_) | ValidationError::TargetMismatch { .. },
        )) => {
            debug!(
                defender = %attack.defender,
                attacker = %attack.attacker,
                "Attack not covered by a parry window"
            );
            Ok(AttackResult::unparried(attack))
        }
        Err(err) => Err(err.into()),
    }
}

/// Player strikes back after a parry. Returns the damage multiplier to apply;
/// `1.0` when the window cannot be countered.
///
/// # Errors
///
/// Returns the core error for storage failure.
pub fn on_counter(engine: &ParryEngine, window: WindowId, at: DateTime<Utc>) -> Result<f64> {
    match engine.counterattack(window, at) {
        Ok(outcome) => Ok(outcome.multiplier),
        Err(RiposteError::Validation(
            ValidationError::NotCounterable { .. }
            | ValidationError::CounterBeforeResolution(_)
            | ValidationError::WindowNotFound(_),
        )) => Ok(1.0),
        Err(err) => Err(err.into()),
    }
}

/// A fact reported by a system outside combat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameplayFact {
    /// Something died at the player's hand.
    Kill {
        /// Killer.
        user: UserId,
        /// Whether the victim was a boss.
        boss: bool,
    },
    /// Outgoing damage.
    DamageDealt {
        /// Attacker.
        user: UserId,
        /// Amount.
        amount: f64,
    },
    /// A crafting or refinery job finished.
    ItemCrafted {
        /// Crafter.
        user: UserId,
        /// Items produced.
        count: u32,
        /// Item template.
        item: String,
    },
    /// Shop, upgrade or repair spending.
    GoldSpent {
        /// Spender.
        user: UserId,
        /// Amount.
        amount: f64,
    },
    /// A quest was turned in.
    QuestCompleted {
        /// Player.
        user: UserId,
        /// Quest key.
        quest: String,
    },
    /// Anything else, counted under `name`.
    Custom {
        /// Player.
        user: UserId,
        /// Stat name.
        name: String,
        /// Amount.
        magnitude: f64,
    },
}

impl GameplayFact {
    /// The event this fact is logged as.
    #[must_use]
    pub fn to_event(&self, at: DateTime<Utc>) -> NewEvent {
        let event = match self {
            Self::Kill { user, boss } => NewEvent::new(EventKind::Kill, *user, 1.0).with("boss", *boss),
            Self::DamageDealt { user, amount } => NewEvent::new(EventKind::DamageDealt, *user, *amount),
            Self::ItemCrafted { user, count, item } => {
                NewEvent::new(EventKind::ItemCrafted, *user, f64::from(*count)).with("item", item.as_str())
            }
            Self::GoldSpent { user, amount } => NewEvent::new(EventKind::GoldSpent, *user, *amount),
            Self::QuestCompleted { user, quest } => {
                NewEvent::new(EventKind::QuestCompleted, *user, 1.0).with("quest", quest.as_str())
            }
            Self::Custom { user, name, magnitude } => {
                NewEvent::new(EventKind::parse(name), *user, *magnitude)
            }
        };
        event.at(at)
    }
}

/// Report a gameplay fact to the event log.
///
/// # Errors
///
/// Returns the core error for invalid magnitude, an empty custom name, or
/// storage failure. The fact is not recorded in that case.
pub fn on_gameplay_fact(dispatcher: &EventDispatcher, fact: &GameplayFact, at: DateTime<Utc>) -> Result<EventId> {
    Ok(dispatcher.log_event(&fact.to_event(at))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use riposte_core::clock::ManualClock;
    use riposte_core::config::{ParryConfig, PersistenceConfig};
    use riposte_core::store::Store;
    use riposte_core::telemetry::NullSink;
    use std::sync::Arc;

    fn setup() -> (ParryEngine, EventDispatcher, DateTime<Utc>) {
        let now = Utc::now();
        let store = Arc::new(Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open"));
        let engine = ParryEngine::with_clock(store.clone(), ParryConfig::default(), Arc::new(ManualClock::new(now)))
            .expect("engine");
        (engine, EventDispatcher::new(store), now)
    }

    fn attack(attacker: i64, at: DateTime<Utc>) -> IncomingAttack {
        IncomingAttack {
            attacker: TargetId(attacker),
            defender: UserId(1),
            damage: 60.0,
            at,
        }
    }

    #[test]
    fn unguarded_attack_lands_in_full() {
        let (engine, _, now) = setup();
        let result = on_incoming_attack(&engine, &attack(5, now)).expect("attack");
        assert!((result.damage_applied - 60.0).abs() < f64::EPSILON);
        assert!(!result.parried());
    }

    #[test]
    fn attack_from_other_target_leaves_window_open() {
        let (engine, _, now) = setup();
        on_parry_input(&engine, UserId(1), TargetId(5)).expect("parry");
        let result = on_incoming_attack(&engine, &attack(6, now)).expect("attack");
        assert!(result.window.is_none());
        assert!(engine.active_window(UserId(1)).expect("read").is_some());
    }

    #[test]
    fn parried_attack_then_counter() {
        let (engine, _, now) = setup();
        on_parry_input(&engine, UserId(1), TargetId(5)).expect("parry");
        let result = on_incoming_attack(&engine, &attack(5, now + chrono::Duration::milliseconds(100)))
            .expect("attack");
        assert!(result.parried());
        assert!(result.damage_applied.abs() < f64::EPSILON);

        let window = result.window.expect("window");
        let multiplier = on_counter(&engine, window, now + chrono::Duration::milliseconds(400)).expect("counter");
        assert!((multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counter_without_parry_is_neutral() {
        let (engine, _, now) = setup();
        assert!((on_counter(&engine, WindowId::new(), now).expect("counter") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn facts_become_events() {
        let (_, dispatcher, now) = setup();
        let facts = [
            GameplayFact::Kill {
                user: UserId(2),
                boss: true,
            },
            GameplayFact::ItemCrafted {
                user: UserId(2),
                count: 3,
                item: "iron_ingot".into(),
            },
            GameplayFact::Custom {
                user: UserId(2),
                name: "guild_upgrade".into(),
                magnitude: 1.0,
            },
        ];
        for fact in &facts {
            on_gameplay_fact(&dispatcher, fact, now).expect("log");
        }

        let events = dispatcher.read_unprocessed(10).expect("read");
        assert_eq!(events.len(), 3);
        assert!((events[1].magnitude - 3.0).abs() < f64::EPSILON);
        assert_eq!(events[2].kind, EventKind::Other("guild_upgrade".into()));
    }

    #[test]
    fn empty_custom_name_is_rejected() {
        let (_, dispatcher, now) = setup();
        let fact = GameplayFact::Custom {
            user: UserId(2),
            name: String::new(),
            magnitude: 1.0,
        };
        assert!(on_gameplay_fact(&dispatcher, &fact, now).is_err());
    }
}
