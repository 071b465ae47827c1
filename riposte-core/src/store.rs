//! SQLite store and unit-of-work scope shared by every Riposte component.
//!
//! A [`Store`] is the explicit session handle the engine, dispatcher,
//! aggregator and tracker are built on. All writes go through
//! [`Store::transaction`], which hands the closure a [`UnitOfWork`]:
//!
//! - the transaction starts as `BEGIN IMMEDIATE`, so the write lock is taken
//!   up front and two handles on the same file serialize instead of failing
//!   at commit time;
//! - `Ok` commits, `Err` (or a panic unwinding through the closure) rolls
//!   back when the transaction is dropped;
//! - telemetry and counter increments requested inside the unit are buffered
//!   and only released after a successful commit.
//!
//! The one-active-window rule lives in the schema as a partial unique index
//! (`idx_parry_one_active`), not in application code.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::metrics::RiposteCounters;
use crate::telemetry::{TelemetryRecord, TelemetrySink};

/// Full schema. Every statement is idempotent so it runs on every open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS game_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    kind         TEXT    NOT NULL,
    user_id      INTEGER NOT NULL,
    magnitude    REAL    NOT NULL,
    context      TEXT    NOT NULL,
    created_at   INTEGER NOT NULL,
    processed    INTEGER NOT NULL DEFAULT 0,
    processed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_events_unprocessed ON game_events(processed, id);
CREATE INDEX IF NOT EXISTS idx_events_user ON game_events(user_id, id);

CREATE TABLE IF NOT EXISTS user_stats (
    user_id    INTEGER NOT NULL,
    stat       TEXT    NOT NULL,
    value      REAL    NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, stat)
);

CREATE TABLE IF NOT EXISTS user_achievements (
    user_id      INTEGER NOT NULL,
    achievement  TEXT    NOT NULL,
    current_tier INTEGER NOT NULL DEFAULT 0,
    progress     REAL    NOT NULL DEFAULT 0,
    repetitions  INTEGER NOT NULL DEFAULT 0,
    unlocked_at  INTEGER,
    updated_at   INTEGER NOT NULL,
    PRIMARY KEY (user_id, achievement)
);

CREATE TABLE IF NOT EXISTS pending_evaluations (
    user_id   INTEGER PRIMARY KEY,
    queued_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reward_grants (
    user_id     INTEGER NOT NULL,
    achievement TEXT    NOT NULL,
    tier        INTEGER NOT NULL,
    tier_name   TEXT    NOT NULL,
    gold        INTEGER NOT NULL,
    xp          INTEGER NOT NULL,
    title       TEXT,
    granted_at  INTEGER NOT NULL,
    UNIQUE (user_id, achievement, tier)
);

CREATE TABLE IF NOT EXISTS parry_windows (
    id                 TEXT    PRIMARY KEY,
    user_id            INTEGER NOT NULL,
    target_id          INTEGER NOT NULL,
    activated_at       INTEGER NOT NULL,
    expires_at         INTEGER NOT NULL,
    status             TEXT    NOT NULL,
    reaction_ms        INTEGER,
    damage_in          REAL,
    damage_taken       REAL,
    resolved_at        INTEGER,
    counter_at         INTEGER,
    counter_multiplier REAL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_parry_one_active
    ON parry_windows(user_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_parry_user ON parry_windows(user_id, activated_at);
CREATE INDEX IF NOT EXISTS idx_parry_stale ON parry_windows(status, expires_at);

CREATE TABLE IF NOT EXISTS parry_stats (
    user_id             INTEGER PRIMARY KEY,
    attempts            INTEGER NOT NULL DEFAULT 0,
    successes           INTEGER NOT NULL DEFAULT 0,
    perfects            INTEGER NOT NULL DEFAULT 0,
    failures            INTEGER NOT NULL DEFAULT 0,
    cancels             INTEGER NOT NULL DEFAULT 0,
    current_streak      INTEGER NOT NULL DEFAULT 0,
    best_streak         INTEGER NOT NULL DEFAULT 0,
    damage_avoided      REAL    NOT NULL DEFAULT 0,
    damage_taken        REAL    NOT NULL DEFAULT 0,
    reaction_ms_total   INTEGER NOT NULL DEFAULT 0,
    reaction_samples    INTEGER NOT NULL DEFAULT 0,
    fastest_reaction_ms INTEGER,
    counterattacks      INTEGER NOT NULL DEFAULT 0,
    counter_bonus_hits  INTEGER NOT NULL DEFAULT 0,
    updated_at          INTEGER NOT NULL
);
";

/// Selects one counter in [`RiposteCounters`].
pub type CounterField = fn(&RiposteCounters) -> &AtomicU64;

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// One open transaction plus the side effects waiting on its commit.
pub struct UnitOfWork<'conn> {
    tx: rusqlite::Transaction<'conn>,
    telemetry: Vec<TelemetryRecord>,
    counter_bumps: Vec<(CounterField, u64)>,
}

impl UnitOfWork<'_> {
    /// The transaction's connection, for statements.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    /// Queue a telemetry record for delivery after commit.
    pub fn emit(&mut self, record: TelemetryRecord) {
        self.telemetry.push(record);
    }

    /// Queue a counter increment for after commit.
    pub fn count(&mut self, field: CounterField, n: u64) {
        self.counter_bumps.push((field, n));
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database holding events, stats, achievements and
/// parry windows.
///
/// # Usage
///
/// ```no_run
/// # use std::sync::Arc;
/// # use riposte_core::config::PersistenceConfig;
/// # use riposte_core::store::Store;
/// # use riposte_core::telemetry::TracingSink;
/// let store = Store::open("riposte.db", &PersistenceConfig::default(), Arc::new(TracingSink))?;
/// let pending: i64 = store.read(|conn| {
///     Ok(conn.query_row("SELECT COUNT(*) FROM game_events WHERE processed = 0", [], |r| r.get(0))?)
/// })?;
/// # Ok::<(), riposte_core::error::RiposteError>(())
/// ```
pub struct Store {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
    telemetry: Arc<dyn TelemetrySink>,
    counters: Arc<RiposteCounters>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) an SQLite database at `path`.
    ///
    /// The schema is created if it does not exist. WAL mode is enabled when
    /// `config.wal_mode` is `true`. Several handles may open the same file;
    /// they coordinate through SQLite's locks and `busy_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RiposteError::Persistence`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: &PersistenceConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Riposte store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
            telemetry,
            counters: Arc::new(RiposteCounters::new()),
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`crate::RiposteError::Persistence`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig, telemetry: Arc<dyn TelemetrySink>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
            telemetry,
            counters: Arc::new(RiposteCounters::new()),
        })
    }

    // ------------------------------------------------------------------
    // Unit of work
    // ------------------------------------------------------------------

    /// Run `f` inside one immediate transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Buffered telemetry
    /// and counter increments are released only after the commit succeeds.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error, or [`crate::RiposteError::Persistence`]
    /// if the transaction cannot begin or commit.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let start = Instant::now();
        let (value, telemetry, counter_bumps) = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut uow = UnitOfWork {
                tx,
                telemetry: Vec::new(),
                counter_bumps: Vec::new(),
            };

            let value = f(&mut uow)?;

            let UnitOfWork {
                tx,
                telemetry,
                counter_bumps,
            } = uow;
            tx.commit()?;
            (value, telemetry, counter_bumps)
        };

        for (field, n) in counter_bumps {
            RiposteCounters::add(field(&self.counters), n);
        }
        for record in &telemetry {
            self.telemetry.record(record);
        }

        debug!(
            elapsed_us = start.elapsed().as_micros(),
            telemetry = telemetry.len(),
            "Unit of work committed"
        );
        Ok(value)
    }

    /// Run a read-only closure against the connection, outside any
    /// transaction.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Counters shared by every component using this store.
    #[must_use]
    pub fn counters(&self) -> &Arc<RiposteCounters> {
        &self.counters
    }

    /// Return the path to the database file (or `:memory:` for in-memory DBs).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Run an integrity check on the database.
    ///
    /// Returns `Ok(true)` if the database passes the check, `Ok(false)` if
    /// corruption is detected.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RiposteError::Persistence`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        self.read(|conn| {
            let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok(result == "ok")
        })
    }

    /// Copy the database to `dest_path` using SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RiposteError::Persistence`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Snapshot the database into `<db>.bak.1`, shifting older snapshots up
    /// one slot and dropping whatever falls past `backup_count`.
    ///
    /// Returns the path written, or `None` for in-memory stores and when
    /// `backup_count` is 0.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RiposteError::Persistence`] or
    /// [`crate::RiposteError::Io`] on failure.
    pub fn create_rotating_backup(&self) -> Result<Option<PathBuf>> {
        let keep = self.config.backup_count;
        if keep == 0 || self.is_in_memory() {
            return Ok(None);
        }

        let evicted = self.backup_slot(keep);
        if evicted.exists() {
            std::fs::remove_file(&evicted)?;
        }
        for slot in (1..keep).rev() {
            let from = self.backup_slot(slot);
            if from.exists() {
                std::fs::rename(&from, self.backup_slot(slot + 1))?;
            }
        }

        let dest = self.backup_slot(1);
        self.backup(&dest)?;
        debug!(keep, dest = %dest.display(), "Backup slots rotated");
        Ok(Some(dest))
    }

    /// Whether this handle is backed by `:memory:` rather than a file.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.db_path.as_os_str() == ":memory:"
    }

    /// `riposte.db` → `riposte.db.bak.<slot>`.
    fn backup_slot(&self, slot: u32) -> PathBuf {
        let mut name = self.db_path.clone().into_os_string();
        name.push(format!(".bak.{slot}"));
        PathBuf::from(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
