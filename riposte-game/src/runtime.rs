//! One-call wiring of store, engine, dispatcher, progression and worker.

use std::path::Path;
use std::sync::Arc;

use riposte_core::achievements::AchievementCatalog;
use riposte_core::config::RiposteConfig;
use riposte_core::events::EventDispatcher;
use riposte_core::parry::ParryEngine;
use riposte_core::progression::Progression;
use riposte_core::store::Store;
use riposte_core::telemetry::sink_from_config;
use tracing::info;

use crate::error::Result;
use crate::worker::{ProgressionWorker, WorkerConfig};

/// Every component the host needs, sharing one store.
#[derive(Debug, Clone)]
pub struct GameRuntime {
    /// Validated configuration.
    pub config: RiposteConfig,
    /// Shared store handle.
    pub store: Arc<Store>,
    /// Parry state machine.
    pub engine: Arc<ParryEngine>,
    /// Event log entry point for non-combat systems.
    pub dispatcher: EventDispatcher,
    /// Aggregation plus achievement evaluation.
    pub progression: Arc<Progression>,
}

impl GameRuntime {
    /// Open the database at `path` and wire the components.
    ///
    /// # Errors
    ///
    /// Returns a config error for an invalid configuration or catalog, or a
    /// persistence error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: RiposteConfig, catalog: AchievementCatalog) -> Result<Self> {
        config.validate()?;
        let store = Store::open(path, &config.persistence, sink_from_config(&config.telemetry))?;
        Self::assemble(store, config, catalog)
    }

    /// Same wiring over an in-memory database.
    ///
    /// # Errors
    ///
    /// As [`GameRuntime::open`].
    pub fn in_memory(config: RiposteConfig, catalog: AchievementCatalog) -> Result<Self> {
        config.validate()?;
        let store = Store::open_in_memory(&config.persistence, sink_from_config(&config.telemetry))?;
        Self::assemble(store, config, catalog)
    }

    fn assemble(store: Store, config: RiposteConfig, catalog: AchievementCatalog) -> Result<Self> {
        catalog.validate()?;
        let store = Arc::new(store);
        let engine = Arc::new(ParryEngine::new(Arc::clone(&store), config.parry.clone())?);
        let dispatcher = EventDispatcher::new(Arc::clone(&store));
        let progression = Arc::new(Progression::new(Arc::clone(&store), Arc::new(catalog)));
        info!(
            db = %store.db_path().display(),
            "Riposte runtime ready"
        );
        Ok(Self {
            config,
            store,
            engine,
            dispatcher,
            progression,
        })
    }

    /// A progression worker over this runtime's components.
    #[must_use]
    pub fn worker(&self) -> Arc<ProgressionWorker> {
        Arc::new(ProgressionWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.progression),
            self.dispatcher.clone(),
            WorkerConfig::from_config(&self.config),
        ))
    }

    /// Counter export in Prometheus text format.
    #[must_use]
    pub fn metrics(&self) -> String {
        self.store.counters().snapshot().to_prometheus()
    }
}
