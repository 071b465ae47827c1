//! Event kinds understood by the progression pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of gameplay fact an event records.
///
/// Known kinds get a fixed stat derivation in the aggregator; anything else
/// travels as [`EventKind::Other`] and is counted under its own name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventKind {
    /// A mob or player was killed.
    Kill,
    /// A parry window resolved as SUCCESS or PERFECT.
    ParrySuccess,
    /// A parry window ended in FAILED.
    ParryFailed,
    /// A counterattack followed a successful parry.
    Counterattack,
    /// Outgoing damage dealt.
    DamageDealt,
    /// Items produced by crafting/refinery jobs.
    ItemCrafted,
    /// Currency spent in shops, upgrades, etc.
    GoldSpent,
    /// A quest was turned in.
    QuestCompleted,
    /// Any kind without a dedicated mapping.
    Other(String),
}

impl EventKind {
    /// Storage name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Kill => "kill",
            Self::ParrySuccess => "parry_success",
            Self::ParryFailed => "parry_failed",
            Self::Counterattack => "counterattack",
            Self::DamageDealt => "damage_dealt",
            Self::ItemCrafted => "item_crafted",
            Self::GoldSpent => "gold_spent",
            Self::QuestCompleted => "quest_completed",
            Self::Other(name) => name,
        }
    }

    /// Parse a storage name. Never fails; unknown names become `Other`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "kill" => Self::Kill,
            "parry_success" => Self::ParrySuccess,
            "parry_failed" => Self::ParryFailed,
            "counterattack" => Self::Counterattack,
            "damage_dealt" => Self::DamageDealt,
            "item_crafted" => Self::ItemCrafted,
            "gold_spent" => Self::GoldSpent,
            "quest_completed" => Self::QuestCompleted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the aggregator has a dedicated mapping for this kind.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}
