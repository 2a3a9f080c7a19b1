//! Storage layer for muxstore data.
//!
//! All state lives in a single SQLite file opened in WAL mode. Every write
//! goes through [`Store::with_tx`], which runs a closure inside one
//! IMMEDIATE transaction and hands it a [`TxWrap`]. Operations that touch
//! several tables take the `TxWrap` directly, so composite operations call
//! each other inside the caller's transaction instead of opening new ones.
//!
//! ## Concurrency
//!
//! - In-process callers serialize on the connection mutex.
//! - Separate processes (or separate `Store`s on one file) serialize on
//!   SQLite's write lock, waiting up to the configured busy timeout before
//!   failing with [`Error::Contention`].
//! - Starting a transaction while one is already running on the same thread
//!   fails with [`Error::NestedTransaction`] rather than deadlocking.
//!
//! ## Modules
//!
//! - [`tx`] - the transaction capability and its query helpers
//! - [`bootstrap`] - idempotent creation of identity, local remote, default session
//! - [`sessions`] - sessions, screens, windows
//! - [`remotes`] - remote targets and their bindings
//! - [`lines`] - lines, cmds, history

pub mod bootstrap;
pub mod lines;
pub mod remotes;
pub mod sessions;
pub mod tx;

pub use bootstrap::BootstrapReport;
pub use tx::{FromRow, TxWrap};

use crate::config::{StoreConfig, resolve_store_config};
use crate::{Error, Result};
use rusqlite::{Connection, TransactionBehavior};
use std::cell::Cell;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

thread_local! {
    static IN_TX: Cell<bool> = const { Cell::new(false) };
}

static GLOBAL_STORE: OnceLock<std::result::Result<Arc<Store>, String>> = OnceLock::new();

/// Marks the current thread as inside a transaction until dropped.
struct TxGuard;

impl TxGuard {
    fn enter() -> Result<Self> {
        if IN_TX.with(Cell::get) {
            return Err(Error::NestedTransaction);
        }
        IN_TX.with(|flag| flag.set(true));
        Ok(TxGuard)
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        IN_TX.with(|flag| flag.set(false));
    }
}

/// Whether the current thread is inside [`Store::with_tx`].
pub fn in_transaction() -> bool {
    IN_TX.with(Cell::get)
}

/// Handle to one muxstore database file.
pub struct Store {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.config.db_path())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if needed) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.home)?;
        let db_path = config.db_path();
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(config.busy_timeout)?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode = %mode, "database did not switch to WAL mode");
        }
        conn.pragma_update(None, "foreign_keys", true)?;
        Self::init_schema(&conn)?;

        tracing::debug!(
            db_path = %db_path.display(),
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "opened store"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
        })
    }

    /// The process-wide store.
    ///
    /// The first call resolves configuration from the environment and opens
    /// the database; its outcome (handle or error) is kept for every later
    /// call.
    pub fn global() -> Result<Arc<Store>> {
        if in_transaction() {
            return Err(Error::NestedTransaction);
        }
        let slot = GLOBAL_STORE.get_or_init(|| {
            resolve_store_config(None)
                .and_then(|resolved| Store::open(&resolved.into_config()))
                .map(Arc::new)
                .map_err(|e| e.to_string())
        });
        match slot {
            Ok(store) => Ok(Arc::clone(store)),
            Err(msg) => Err(Error::StoreUnavailable(msg.clone())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back when it returns `Err` or
    /// panics.
    pub fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TxWrap<'_>) -> Result<T>,
    {
        let _guard = TxGuard::enter()?;
        let mut conn = self.lock();

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| log_contention(Error::from(e)))?;

        let result = f(&TxWrap::new(&tx));
        match result {
            Ok(value) => {
                tx.commit().map_err(|e| log_contention(Error::from(e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(log_contention(err))
            }
        }
    }

    /// Raw connection access for read-only diagnostics.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        if in_transaction() {
            return Err(Error::NestedTransaction);
        }
        Ok(self.lock())
    }

    /// A panic inside `with_tx` poisons the mutex after its transaction has
    /// rolled back, so the connection is still usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS client (
                user_id TEXT PRIMARY KEY,
                active_session_id TEXT NOT NULL DEFAULT '',
                user_public_key_bytes BLOB NOT NULL,
                user_private_key_bytes BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                session_idx INTEGER NOT NULL,
                active_screen_id TEXT NOT NULL DEFAULT '',
                owner_user_id TEXT NOT NULL DEFAULT '',
                share_mode TEXT NOT NULL DEFAULT 'local',
                access_key TEXT NOT NULL DEFAULT '',
                notify_num INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_name ON sessions(name);

            CREATE TABLE IF NOT EXISTS screens (
                session_id TEXT NOT NULL,
                screen_id TEXT NOT NULL,
                screen_idx INTEGER NOT NULL,
                name TEXT NOT NULL,
                active_window_id TEXT NOT NULL DEFAULT '',
                screen_opts TEXT,
                owner_user_id TEXT NOT NULL DEFAULT '',
                share_mode TEXT NOT NULL DEFAULT 'local',
                PRIMARY KEY (session_id, screen_id),
                FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_screens_name ON screens(session_id, name);

            CREATE TABLE IF NOT EXISTS windows (
                session_id TEXT NOT NULL,
                window_id TEXT NOT NULL,
                cur_remote TEXT NOT NULL DEFAULT '',
                win_opts TEXT,
                owner_user_id TEXT NOT NULL DEFAULT '',
                share_mode TEXT NOT NULL DEFAULT 'local',
                share_opts TEXT,
                PRIMARY KEY (session_id, window_id),
                FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS screen_windows (
                session_id TEXT NOT NULL,
                screen_id TEXT NOT NULL,
                window_id TEXT NOT NULL,
                name TEXT NOT NULL,
                layout TEXT,
                PRIMARY KEY (session_id, screen_id, window_id),
                FOREIGN KEY (session_id, screen_id)
                    REFERENCES screens(session_id, screen_id) ON DELETE CASCADE,
                FOREIGN KEY (session_id, window_id)
                    REFERENCES windows(session_id, window_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS remotes (
                remote_id TEXT PRIMARY KEY,
                physical_id TEXT NOT NULL DEFAULT '',
                remote_type TEXT NOT NULL,
                remote_alias TEXT NOT NULL DEFAULT '',
                remote_canonical_name TEXT NOT NULL,
                remote_sudo INTEGER NOT NULL DEFAULT 0,
                remote_user TEXT NOT NULL DEFAULT '',
                remote_host TEXT NOT NULL DEFAULT '',
                auto_connect INTEGER NOT NULL DEFAULT 0,
                init_pk TEXT,
                ssh_opts TEXT,
                last_connect_ts INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_remotes_canonical_name
                ON remotes(remote_canonical_name);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_remotes_alias
                ON remotes(remote_alias) WHERE remote_alias <> '';

            CREATE TABLE IF NOT EXISTS remote_instances (
                ri_id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                session_id TEXT NOT NULL,
                window_id TEXT,
                remote_id TEXT NOT NULL,
                session_scope INTEGER NOT NULL DEFAULT 0,
                state TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE,
                FOREIGN KEY (session_id, window_id)
                    REFERENCES windows(session_id, window_id) ON DELETE CASCADE,
                FOREIGN KEY (remote_id) REFERENCES remotes(remote_id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_remote_instances_binding
                ON remote_instances(session_id, COALESCE(window_id, ''), remote_id);

            CREATE TABLE IF NOT EXISTS lines (
                session_id TEXT NOT NULL,
                window_id TEXT NOT NULL,
                line_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                user_id TEXT NOT NULL DEFAULT '',
                line_type TEXT NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                cmd_id TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (session_id, window_id, line_id),
                FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_lines_window_ts ON lines(session_id, window_id, ts);

            CREATE TABLE IF NOT EXISTS cmds (
                session_id TEXT NOT NULL,
                cmd_id TEXT NOT NULL,
                remote_id TEXT NOT NULL DEFAULT '',
                cmd_str TEXT NOT NULL DEFAULT '',
                remote_state TEXT,
                term_opts TEXT,
                status TEXT NOT NULL,
                start_pk TEXT,
                done_pk TEXT,
                used_rows INTEGER NOT NULL DEFAULT 0,
                run_out TEXT,
                PRIMARY KEY (session_id, cmd_id),
                FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS history (
                history_id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                user_id TEXT NOT NULL DEFAULT '',
                session_id TEXT NOT NULL,
                screen_id TEXT NOT NULL DEFAULT '',
                window_id TEXT NOT NULL DEFAULT '',
                line_id TEXT NOT NULL DEFAULT '',
                had_error INTEGER NOT NULL DEFAULT 0,
                cmd_id TEXT NOT NULL DEFAULT '',
                cmd_str TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_history_session_ts ON history(session_id, ts);
            "#,
        )?;
        Ok(())
    }
}

fn log_contention(err: Error) -> Error {
    if let Error::Contention(ref detail) = err {
        tracing::warn!(%detail, "store contention, transaction abandoned");
    }
    err
}

/// Generate a new entity id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
