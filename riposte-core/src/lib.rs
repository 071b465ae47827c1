//! # Riposte Core Library
//!
//! Parry timing and event-sourced progression for a live-service game.
//!
//! ```text
//! ParryEngine ──▶ EventDispatcher ──▶ game_events ──▶ StatAggregator
//!                                                         │
//!                              reward ledger ◀── AchievementTracker
//! ```
//!
//! - **Parry engine**: per-user defensive windows classified as perfect,
//!   standard or late, with mitigation, streaks and counterattack bonuses.
//! - **Event log**: append-only gameplay facts, consumed exactly once.
//! - **Stat aggregator**: folds facts into per-user accumulators.
//! - **Achievement tracker**: tier ladders and repeatable rewards, granted
//!   once per rung even when a single batch jumps several rungs.
//!
//! Every component shares one [`Store`]; every write goes through
//! [`Store::transaction`].
//!
//! ## Guarantees
//!
//! - At most one active parry window per user, enforced by the schema.
//! - A window turns terminal once, with exactly one statistics update.
//! - Events are claimed and folded in the same transaction.
//! - Stored achievement tiers never decrease.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod achievements;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod parry;
pub mod progression;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod types;

pub use achievements::{AchievementCatalog, AchievementTracker, Unlock};
pub use config::RiposteConfig;
pub use error::{RiposteError, ValidationError};
pub use events::{EventDispatcher, EventKind, GameEvent, NewEvent};
pub use parry::{ParryEngine, ParryWindow, WindowStatus};
pub use progression::{CycleReport, Progression};
pub use stats::StatAggregator;
pub use store::Store;
pub use types::*;
