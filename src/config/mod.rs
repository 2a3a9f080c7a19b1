//! Configuration for muxstore.
//!
//! Everything lives under one home directory:
//!
//! - `<home>/muxstore.db` - the SQLite store (file name configurable)
//! - `<home>/config.kdl` - optional settings, see [`schema`]
//! - `<home>/remoteid` - stable id of the local machine, see [`crate::sys`]
//!
//! ## Precedence
//!
//! Home: `--home` flag > `MUXSTORE_HOME` env > `~/.muxstore`
//! Busy timeout: `MUXSTORE_BUSY_TIMEOUT_MS` env > config.kdl > default
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    BUSY_TIMEOUT_ENV, HOME_ENV, Resolved, ResolvedStoreConfig, ValueSource, resolve_store_config,
};
pub use schema::MuxConfig;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_FILE: &str = "muxstore.db";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);
pub const CONFIG_FILE_NAME: &str = "config.kdl";
pub const REMOTE_ID_FILE_NAME: &str = "remoteid";

/// Settings needed to open a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub home: PathBuf,
    pub db_file: String,
    /// How long a writer waits for the SQLite write lock
    pub busy_timeout: Duration,
    pub log_level: Option<String>,
}

impl StoreConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            db_file: DEFAULT_DB_FILE.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            log_level: None,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join(&self.db_file)
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE_NAME)
    }

    pub fn remote_id_path(&self) -> PathBuf {
        self.home.join(REMOTE_ID_FILE_NAME)
    }
}
