//! Achievement definitions: static reference data, built in or loaded from TOML.
//!
//! ```toml
//! [[achievement]]
//! key = "parry_master"
//! stat = "total_parry_success"
//! tiers = [
//!     { name = "bronze", threshold = 10, reward = { gold = 100, xp = 50 } },
//!     { name = "silver", threshold = 50, reward = { gold = 500, xp = 250 } },
//! ]
//!
//! [[achievement]]
//! key = "crafter"
//! stat = "items_crafted"
//! repeat = { step = 25, reward = { gold = 40 } }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiposteError};
use crate::stats::names;

/// What a rung pays out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    /// Currency.
    #[serde(default)]
    pub gold: i64,
    /// Experience.
    #[serde(default)]
    pub xp: i64,
    /// Cosmetic title, if any.
    #[serde(default)]
    pub title: Option<String>,
}

/// One rung of a tiered achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Display name (bronze, silver...).
    pub name: String,
    /// Stat value at which this rung unlocks.
    pub threshold: f64,
    /// Paid once when the rung is granted.
    #[serde(default)]
    pub reward: Reward,
}

/// Repeatable achievement: pays `reward` every `step` units of the stat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    /// Stat units per repetition.
    pub step: f64,
    /// Paid for every repetition crossed.
    #[serde(default)]
    pub reward: Reward,
}

/// A tracked stat and its reward ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    /// Stable identifier.
    pub key: String,
    /// Stat name whose value drives progress.
    pub stat: String,
    /// Ascending rungs. Empty for progressive achievements.
    #[serde(default)]
    pub tiers: Vec<Tier>,
    /// Present for progressive achievements.
    #[serde(default)]
    pub repeat: Option<Repeat>,
}

impl AchievementDefinition {
    /// A tiered definition from `(name, threshold, reward)` rungs.
    #[must_use]
    pub fn tiered(key: &str, stat: &str, tiers: Vec<Tier>) -> Self {
        Self {
            key: key.to_string(),
            stat: stat.to_string(),
            tiers,
            repeat: None,
        }
    }

    /// A progressive definition.
    #[must_use]
    pub fn progressive(key: &str, stat: &str, step: f64, reward: Reward) -> Self {
        Self {
            key: key.to_string(),
            stat: stat.to_string(),
            tiers: Vec::new(),
            repeat: Some(Repeat { step, reward }),
        }
    }

    /// Whether rewards repeat.
    #[must_use]
    pub fn is_progressive(&self) -> bool {
        self.repeat.is_some()
    }

    /// Number of rungs reached at `value`.
    ///
    /// For tiered achievements this is the 1-based index of the highest tier
    /// whose threshold is ≤ `value`; for progressive ones, whole repetitions.
    #[must_use]
    pub fn rungs_at(&self, value: f64) -> u32 {
        match &self.repeat {
            Some(repeat) => {
                let reps = (value / repeat.step).floor();
                if reps.is_finite() && reps > 0.0 {
                    // Saturates at u32::MAX for absurd values.
                    reps as u32
                } else {
                    0
                }
            }
            None => {
                let reached = self.tiers.iter().take_while(|t| t.threshold <= value).count();
                u32::try_from(reached).unwrap_or(u32::MAX)
            }
        }
    }

    /// Name and reward of rung `n` (1-based).
    #[must_use]
    pub fn rung(&self, n: u32) -> Option<(String, Reward)> {
        match &self.repeat {
            Some(repeat) if n > 0 => Some((format!("{}#{n}", self.key), repeat.reward.clone())),
            Some(_) => None,
            None => {
                let idx = usize::try_from(n).ok()?.checked_sub(1)?;
                self.tiers.get(idx).map(|t| (t.name.clone(), t.reward.clone()))
            }
        }
    }

    /// Check ladder shape.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(RiposteError::Config(format!("achievement `{}`: {msg}", self.key)));
        if self.key.trim().is_empty() || self.stat.trim().is_empty() {
            return bad("key and stat must be non-empty".into());
        }
        match (&self.repeat, self.tiers.is_empty()) {
            (Some(_), false) => return bad("cannot have both tiers and repeat".into()),
            (None, true) => return bad("needs tiers or repeat".into()),
            (Some(repeat), true) => {
                if !(repeat.step.is_finite() && repeat.step > 0.0) {
                    return bad(format!("repeat step {} must be positive", repeat.step));
                }
            }
            (None, false) => {
                let mut previous = 0.0;
                for tier in &self.tiers {
                    if !(tier.threshold.is_finite() && tier.threshold > previous) {
                        return bad(format!(
                            "tier `{}` threshold {} must be positive and above the previous tier",
                            tier.name, tier.threshold
                        ));
                    }
                    previous = tier.threshold;
                }
            }
        }
        Ok(())
    }
}

/// Shorthand for building a tier.
#[must_use]
pub fn tier(name: &str, threshold: f64, gold: i64, xp: i64) -> Tier {
    Tier {
        name: name.to_string(),
        threshold,
        reward: Reward {
            gold,
            xp,
            title: None,
        },
    }
}

/// The full set of definitions a tracker evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementCatalog {
    /// All definitions, in evaluation order.
    #[serde(rename = "achievement", default)]
    pub achievements: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    /// Build and validate a catalog.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` for invalid ladders or duplicate keys.
    pub fn new(achievements: Vec<AchievementDefinition>) -> Result<Self> {
        let catalog = Self { achievements };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load from a TOML string.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` if parsing or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let catalog: Self = toml::from_str(toml_str).map_err(|e| RiposteError::Config(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check every definition and key uniqueness.
    ///
    /// # Errors
    /// Returns `RiposteError::Config` for the first problem found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for def in &self.achievements {
            def.validate()?;
            if !seen.insert(def.key.as_str()) {
                return Err(RiposteError::Config(format!("duplicate achievement key `{}`", def.key)));
            }
        }
        Ok(())
    }

    /// Look up a definition by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|d| d.key == key)
    }

    /// Definitions tracking `stat`.
    pub fn tracking<'a>(&'a self, stat: &'a str) -> impl Iterator<Item = &'a AchievementDefinition> + 'a {
        self.achievements.iter().filter(move |d| d.stat == stat)
    }

    /// Shipped defaults.
    #[must_use]
    pub fn builtin() -> Self {
        let mut parry_master = AchievementDefinition::tiered(
            "parry_master",
            names::TOTAL_PARRY_SUCCESS,
            vec![
                tier("bronze", 10.0, 100, 50),
                tier("silver", 50.0, 500, 250),
                tier("gold", 200.0, 2000, 1000),
            ],
        );
        if let Some(gold) = parry_master.tiers.last_mut() {
            gold.reward.title = Some("Unbreakable".to_string());
        }

        Self {
            achievements: vec![
                parry_master,
                AchievementDefinition::tiered(
                    "perfectionist",
                    names::TOTAL_PERFECT_PARRIES,
                    vec![
                        tier("bronze", 5.0, 150, 75),
                        tier("silver", 25.0, 750, 300),
                        tier("gold", 100.0, 3000, 1200),
                    ],
                ),
                AchievementDefinition::tiered(
                    "riposte_artist",
                    names::BONUS_COUNTERATTACKS,
                    vec![tier("bronze", 10.0, 120, 60), tier("silver", 75.0, 900, 400)],
                ),
                AchievementDefinition::tiered(
                    "slayer",
                    names::TOTAL_KILLS,
                    vec![
                        tier("bronze", 100.0, 100, 100),
                        tier("silver", 1000.0, 1000, 800),
                        tier("gold", 10_000.0, 10_000, 5000),
                    ],
                ),
                AchievementDefinition::tiered(
                    "boss_hunter",
                    names::BOSS_KILLS,
                    vec![tier("bronze", 1.0, 250, 200), tier("silver", 10.0, 2500, 1500)],
                ),
                AchievementDefinition::progressive(
                    "crafter",
                    names::ITEMS_CRAFTED,
                    25.0,
                    Reward {
                        gold: 40,
                        xp: 20,
                        title: None,
                    },
                ),
            ],
        }
    }
}

impl Default for AchievementCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
