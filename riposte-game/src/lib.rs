//! # riposte-game: Host Integration for Riposte
//!
//! This crate connects the game-agnostic `riposte-core` library to a game
//! server: combat and economy hooks, a background progression worker, and
//! process bootstrap (logging, deployment profiles).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Game server                   │
//! │   combat ──┐         economy / quests ──┐     │
//! │            ▼                            ▼     │
//! │  ┌────────────────────────────────────────┐   │
//! │  │            riposte-game                 │   │
//! │  │  ┌─────────┐  ┌────────┐  ┌─────────┐  │   │
//! │  │  │  hooks  │  │ worker │  │ runtime │  │   │
//! │  │  └────┬────┘  └───┬────┘  └────┬────┘  │   │
//! │  │       ▼           ▼            ▼       │   │
//! │  │    ┌──────────────────────────────┐    │   │
//! │  │    │         riposte-core         │    │   │
//! │  │    └──────────────────────────────┘    │   │
//! │  └────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `hooks`: parry input, incoming attacks, counters and gameplay facts
//! - `worker`: periodic sweep, aggregation and achievement evaluation
//! - `runtime`: wires store, engine, dispatcher and progression together
//! - `profile`: development / production / load-test presets
//! - `logging`: `tracing` subscriber setup
//! - `error`: integration-layer errors

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod hooks;
pub mod logging;
pub mod profile;
pub mod runtime;
pub mod worker;

pub use error::{GameError, Result};
pub use hooks::{AttackResult, GameplayFact, IncomingAttack};
pub use profile::DeploymentProfile;
pub use runtime::GameRuntime;
pub use worker::{ProgressionWorker, TickReport, WorkerConfig};
