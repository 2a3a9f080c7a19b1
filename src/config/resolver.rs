//! Precedence resolution for store configuration.
//!
//! ## Home Precedence (highest to lowest)
//!
//! 1. `--home` CLI flag
//! 2. `MUXSTORE_HOME` environment variable
//! 3. `~/.muxstore`
//!
//! ## Busy Timeout Precedence (highest to lowest)
//!
//! 1. `MUXSTORE_BUSY_TIMEOUT_MS` environment variable
//! 2. `<home>/config.kdl`
//! 3. Built-in default (5000 ms)

use super::{DEFAULT_BUSY_TIMEOUT, DEFAULT_DB_FILE, MuxConfig, StoreConfig};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "MUXSTORE_HOME";
/// Environment variable overriding the busy timeout.
pub const BUSY_TIMEOUT_ENV: &str = "MUXSTORE_BUSY_TIMEOUT_MS";

const DEFAULT_HOME_DIR_NAME: &str = ".muxstore";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Store configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedStoreConfig {
    pub home: Resolved<PathBuf>,
    pub db_file: Resolved<String>,
    pub busy_timeout: Resolved<Duration>,
    pub log_level: Option<Resolved<String>>,
}

impl ResolvedStoreConfig {
    /// Drop source tracking.
    pub fn into_config(self) -> StoreConfig {
        StoreConfig {
            home: self.home.value,
            db_file: self.db_file.value,
            busy_timeout: self.busy_timeout.value,
            log_level: self.log_level.map(|r| r.value),
        }
    }
}

fn resolve_home(home_override: Option<PathBuf>) -> Result<Resolved<PathBuf>> {
    if let Some(path) = home_override {
        return Ok(Resolved::new(path, ValueSource::CliFlag));
    }
    if let Ok(path) = std::env::var(HOME_ENV) {
        if !path.is_empty() {
            return Ok(Resolved::new(
                PathBuf::from(path),
                ValueSource::EnvVar(HOME_ENV.to_string()),
            ));
        }
    }
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
    Ok(Resolved::new(
        home.join(DEFAULT_HOME_DIR_NAME),
        ValueSource::Default,
    ))
}

/// Resolve the store configuration with full precedence chain.
pub fn resolve_store_config(home_override: Option<PathBuf>) -> Result<ResolvedStoreConfig> {
    let home = resolve_home(home_override)?;
    let file_config = MuxConfig::load(&home.value.join(super::CONFIG_FILE_NAME))?;

    let db_file = match file_config.db_file {
        Some(name) => Resolved::new(name, ValueSource::ConfigFile),
        None => Resolved::new(DEFAULT_DB_FILE.to_string(), ValueSource::Default),
    };

    let env_timeout = match std::env::var(BUSY_TIMEOUT_ENV) {
        Ok(raw) if !raw.is_empty() => Some(raw.trim().parse::<u64>().map_err(|_| {
            Error::Config(format!(
                "{} must be a number of milliseconds, got {:?}",
                BUSY_TIMEOUT_ENV, raw
            ))
        })?),
        _ => None,
    };
    let busy_timeout = if let Some(ms) = env_timeout {
        Resolved::new(
            Duration::from_millis(ms),
            ValueSource::EnvVar(BUSY_TIMEOUT_ENV.to_string()),
        )
    } else if let Some(ms) = file_config.busy_timeout_ms {
        Resolved::new(Duration::from_millis(ms), ValueSource::ConfigFile)
    } else {
        Resolved::new(DEFAULT_BUSY_TIMEOUT, ValueSource::Default)
    };

    let log_level = file_config
        .log_level
        .map(|level| Resolved::new(level, ValueSource::ConfigFile));

    Ok(ResolvedStoreConfig {
        home,
        db_file,
        busy_timeout,
        log_level,
    })
}
