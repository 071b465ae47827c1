//! Pure timing math: classification, mitigation, counter multiplier.

use serde::{Deserialize, Serialize};

use crate::config::ParryConfig;

/// Where a reaction time falls relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timing {
    /// `0 <= r <= perfect_threshold_ms`: full negation.
    Perfect,
    /// `perfect_threshold_ms < r <= window_ms`: partial negation.
    Standard,
    /// `r > window_ms`: the window had already lapsed.
    Late,
}

/// Classify a non-negative reaction time. Both boundaries are inclusive.
///
/// Negative reactions are rejected by the engine before this is called; they
/// classify as `Perfect` here only because `r <= threshold` holds.
#[must_use]
pub fn classify(reaction_ms: i64, config: &ParryConfig) -> Timing {
    if reaction_ms <= config.perfect_threshold_ms {
        Timing::Perfect
    } else if reaction_ms <= config.window_ms {
        Timing::Standard
    } else {
        Timing::Late
    }
}

/// How incoming damage splits between the defender and the parry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mitigation {
    /// Passed through to the defender.
    pub damage_taken: f64,
    /// Negated by the parry.
    pub damage_avoided: f64,
}

/// Split `damage` according to `timing`.
#[must_use]
pub fn mitigation(timing: Timing, damage: f64, config: &ParryConfig) -> Mitigation {
    let avoided = match timing {
        Timing::Perfect => damage,
        Timing::Standard => damage * config.standard_negation,
        Timing::Late => 0.0,
    };
    Mitigation {
        damage_taken: damage - avoided,
        damage_avoided: avoided,
    }
}

/// Counterattack multiplier `since_parry_ms` after the parry resolved.
///
/// Inside `counter_window_ms` (inclusive) the multiplier depends on whether
/// the parry was perfect; afterwards it is neutral.
#[must_use]
pub fn counter_multiplier(perfect: bool, since_parry_ms: i64, config: &ParryConfig) -> f64 {
    if since_parry_ms > config.counter_window_ms {
        1.0
    } else if perfect {
        config.perfect_counter_multiplier
    } else {
        config.counter_multiplier
    }
}
