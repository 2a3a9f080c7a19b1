//! KDL schema for config.kdl.
//!
//! # KDL Schema
//!
//! ```kdl
//! db-file "muxstore.db"
//! busy-timeout-ms 5000
//! log-level "info"
//! ```
//!
//! Unknown nodes are ignored.

use crate::{Error, Result};
use kdl::KdlDocument;
use std::fs;
use std::path::Path;

/// Longest busy timeout accepted from a config file (10 minutes).
const MAX_BUSY_TIMEOUT_MS: u64 = 600_000;

/// Settings stored in config.kdl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxConfig {
    /// Database file name, relative to the home directory
    pub db_file: Option<String>,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: Option<u64>,

    /// Default tracing filter for the CLI (e.g., "info", "muxstore=debug")
    pub log_level: Option<String>,
}

impl MuxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ref db_file) = self.db_file {
            if db_file.is_empty() || db_file.contains('/') || db_file.contains('\\') {
                return Err(format!(
                    "db-file must be a plain file name, got {:?}",
                    db_file
                ));
            }
        }
        if let Some(ms) = self.busy_timeout_ms {
            if ms > MAX_BUSY_TIMEOUT_MS {
                return Err(format!(
                    "busy-timeout-ms must be at most {}, got {}",
                    MAX_BUSY_TIMEOUT_MS, ms
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(node) = doc.get("db-file") {
            if let Some(entry) = node.entries().first() {
                if let Some(s) = entry.value().as_string() {
                    config.db_file = Some(s.to_string());
                }
            }
        }

        if let Some(node) = doc.get("busy-timeout-ms") {
            if let Some(entry) = node.entries().first() {
                if let Some(i) = entry.value().as_integer() {
                    if i >= 0 {
                        config.busy_timeout_ms = u64::try_from(i).ok();
                    }
                }
            }
        }

        if let Some(node) = doc.get("log-level") {
            if let Some(entry) = node.entries().first() {
                if let Some(s) = entry.value().as_string() {
                    config.log_level = Some(s.to_string());
                }
            }
        }

        config
    }

    /// Load config.kdl, returning an empty config when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        let doc: KdlDocument = text
            .parse()
            .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|msg| Error::Config(format!("{}: {}", path.display(), msg)))?;
        Ok(config)
    }
}
