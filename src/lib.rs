//! muxstore - Persistence layer for a multi-user terminal multiplexing service.
//!
//! This library stores the session / screen / window / line / cmd hierarchy,
//! known remote targets, and the single local client identity in one SQLite
//! file, and provides the idempotent bootstrap and transactional write layer
//! that keeps the hierarchy consistent.

pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod models;
pub mod storage;
pub mod sys;

pub use codec::CodecError;
pub use storage::{Store, TxWrap};


/// Library-level error type for muxstore operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Corrupt column: {0}")]
    Codec(#[from] CodecError),

    #[error("Cannot start a transaction inside a running transaction")]
    NestedTransaction,

    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("Store busy: {0}")]
    Contention(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller may retry the whole operation after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Contention(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        use rusqlite::ffi;

        if let rusqlite::Error::SqliteFailure(failure, msg) = &err {
            let detail = msg.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Error::Contention(detail);
                }
                ErrorCode::ConstraintViolation
                    if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Error::AlreadyExists(detail);
                }
                _ => {}
            }
        }

        match err {
            rusqlite::Error::FromSqlConversionFailure(idx, ty, inner) => {
                match inner.downcast::<CodecError>() {
                    Ok(codec) => Error::Codec(*codec),
                    Err(inner) => {
                        Error::Database(rusqlite::Error::FromSqlConversionFailure(idx, ty, inner))
                    }
                }
            }
            other => Error::Database(other),
        }
    }
}

/// Result type alias for muxstore operations.
pub type Result<T> = std::result::Result<T, Error>;
