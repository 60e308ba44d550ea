//! Error types for the sync engine
//!
//! Transport-level failures and breaker trips are distinct variants so the
//! engine can decide between aborting a step and aborting the whole run.

use thiserror::Error;

/// Sync engine error
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure or non-2xx response (other than 401/402)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote rejected the credentials (401)
    #[error("Authentication rejected by remote catalog")]
    Auth,

    /// Remote license does not permit API access (402)
    #[error("Remote catalog license does not allow API access")]
    License,

    /// 2xx response whose body could not be interpreted
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Consecutive failures reached the threshold; the run is over
    #[error("Sync terminated: {error_count} consecutive failures (threshold {threshold})")]
    Terminated { error_count: i64, threshold: i64 },

    /// Local store write or read failed
    #[error("Local persistence error: {0}")]
    LocalPersistence(String),

    /// Media blob could not be fetched
    #[error("Media download failed: {0}")]
    MediaDownload(String),

    /// Missing or invalid configuration (credentials, options)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True when the caller must stop all remote work for this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Terminated { .. })
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::LocalPersistence(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::LocalPersistence(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::LocalPersistence(format!("JSON encoding: {}", err))
    }
}

impl From<oasync_common::Error> for SyncError {
    fn from(err: oasync_common::Error) -> Self {
        match err {
            oasync_common::Error::Config(msg) => SyncError::Config(msg),
            other => SyncError::LocalPersistence(other.to_string()),
        }
    }
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
