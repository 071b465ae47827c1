//! Typed view of an event's context, decoded per kind.
//!
//! Events are stored with an open JSON object as context so upstream systems
//! can attach whatever they like. The aggregator only cares about a handful
//! of keys per kind; this module pulls those out with their expected types.
//! Keys it does not know are ignored. A known key with the wrong type makes
//! the whole event malformed.

use serde_json::{Map, Value};

use crate::error::AggregationError;
use crate::events::{EventKind, GameEvent};

/// The fields of an event that drive stat derivation.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `kill`; `boss` defaults to false.
    Kill {
        /// The victim was a boss.
        boss: bool,
    },
    /// `parry_success`.
    ParrySuccess {
        /// Resolved within the perfect threshold.
        perfect: bool,
        /// Reaction time, when the producer recorded it.
        reaction_ms: Option<i64>,
    },
    /// `parry_failed`.
    ParryFailed,
    /// `counterattack`.
    Counterattack {
        /// Landed inside the bonus window.
        bonus: bool,
    },
    /// `damage_dealt`; the amount is the event magnitude.
    DamageDealt,
    /// `item_crafted`; the count is the event magnitude.
    ItemCrafted,
    /// `gold_spent`; the amount is the event magnitude.
    GoldSpent,
    /// `quest_completed`.
    QuestCompleted,
    /// Any other kind, counted under its own name.
    Other {
        /// Stat name to accumulate into.
        name: String,
    },
}

impl EventPayload {
    /// Decode the context of `event` for its kind.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregationError`] if the context is not a JSON object or
    /// a key the kind relies on has the wrong type.
    pub fn decode(event: &GameEvent) -> Result<Self, AggregationError> {
        let context = event.context()?;
        let id = event.id.0;
        Ok(match &event.kind {
            EventKind::Kill => Self::Kill {
                boss: flag(&context, "boss", id)?,
            },
            EventKind::ParrySuccess => Self::ParrySuccess {
                perfect: flag(&context, "perfect", id)?,
                reaction_ms: integer(&context, "reaction_ms", id)?,
            },
            EventKind::ParryFailed => Self::ParryFailed,
            EventKind::Counterattack => Self::Counterattack {
                bonus: flag(&context, "bonus", id)?,
            },
            EventKind::DamageDealt => Self::DamageDealt,
            EventKind::ItemCrafted => Self::ItemCrafted,
            EventKind::GoldSpent => Self::GoldSpent,
            EventKind::QuestCompleted => Self::QuestCompleted,
            EventKind::Other(name) => Self::Other { name: name.clone() },
        })
    }
}

/// Optional boolean key. Missing or null reads as `false`.
fn flag(context: &Map<String, Value>, field: &'static str, event: i64) -> Result<bool, AggregationError> {
    match context.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(AggregationError::FieldType {
            event,
            field,
            expected: "boolean",
        }),
    }
}

/// Optional integer key.
fn integer(context: &Map<String, Value>, field: &'static str, event: i64) -> Result<Option<i64>, AggregationError> {
    match context.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or(AggregationError::FieldType {
            event,
            field,
            expected: "integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, UserId};
    use chrono::Utc;
    use serde_json::json;

    fn event(kind: EventKind, context: &str) -> GameEvent {
        GameEvent {
            id: EventId(42),
            kind,
            user: UserId(1),
            magnitude: 1.0,
            context: context.to_string(),
            created_at: Utc::now(),
            processed: false,
        }
    }

    #[test]
    fn kill_defaults_to_non_boss() {
        let payload = EventPayload::decode(&event(EventKind::Kill, "{}")).expect("decode");
        assert_eq!(payload, EventPayload::Kill { boss: false });
    }

    #[test]
    fn boss_flag_is_read() {
        let ctx = json!({"boss": true, "mob": "lich"}).to_string();
        let payload = EventPayload::decode(&event(EventKind::Kill, &ctx)).expect("decode");
        assert_eq!(payload, EventPayload::Kill { boss: true });
    }

    #[test]
    fn wrong_type_is_malformed() {
        let ctx = json!({"boss": "yes"}).to_string();
        let err = EventPayload::decode(&event(EventKind::Kill, &ctx)).expect_err("malformed");
        assert_eq!(
            err,
            AggregationError::FieldType {
                event: 42,
                field: "boss",
                expected: "boolean"
            }
        );
    }

    #[test]
    fn non_object_context_is_malformed() {
        let err = EventPayload::decode(&event(EventKind::Kill, "[1,2]")).expect_err("malformed");
        assert_eq!(err, AggregationError::NotAnObject { event: 42 });
    }

    #[test]
    fn unparseable_context_is_malformed() {
        let err = EventPayload::decode(&event(EventKind::Kill, "{oops")).expect_err("malformed");
        assert!(matches!(err, AggregationError::Unparseable { event: 42, .. }));
    }

    #[test]
    fn parry_success_reads_reaction() {
        let ctx = json!({"perfect": true, "reaction_ms": 180}).to_string();
        let payload = EventPayload::decode(&event(EventKind::ParrySuccess, &ctx)).expect("decode");
        assert_eq!(
            payload,
            EventPayload::ParrySuccess {
                perfect: true,
                reaction_ms: Some(180)
            }
        );
    }

    #[test]
    fn unknown_kind_keeps_its_name() {
        let payload =
            EventPayload::decode(&event(EventKind::Other("guild_upgrade".into()), "{}")).expect("decode");
        assert_eq!(
            payload,
            EventPayload::Other {
                name: "guild_upgrade".into()
            }
        );
    }
}
