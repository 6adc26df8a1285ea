use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Convenience result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error type returned by loader setup and pipeline stages.
///
/// Row-level and batch-level problems are not represented here: they are recorded in the
/// [`crate::report::IngestionReport`] and never abort a run. Every variant of this enum is
/// either a configuration mistake or a run-fatal condition.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Underlying I/O error (e.g. file not found, permission denied, read failure mid-stream).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV framing error that is not attributable to a single record.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The source header is absent or does not fit the target schema.
    #[error("structural error: {message}")]
    Structural { message: String },

    /// The store stayed unreachable after the configured number of attempts.
    #[error("connection failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    /// Invalid [`crate::config::LoadOptions`].
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A store operation failed outside of a batch write (health probe, verification).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LoadError {
    pub(crate) fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Classification of a failure reported by a store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The store could not be reached or the connection broke.
    Unavailable,
    /// The store refused the statement (constraint violation, type error, ...).
    Rejected,
    /// The statement exceeded its command timeout.
    Timeout,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A store-level failure carrying the backend's native error text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("store {kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Rejected, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let kind = match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => StoreErrorKind::Timeout,
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => StoreErrorKind::Timeout,
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::SystemIoFailure)
            | Some(ErrorCode::PermissionDenied) => StoreErrorKind::Unavailable,
            _ => StoreErrorKind::Rejected,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_includes_kind_and_detail() {
        let err = StoreError::rejected("UNIQUE constraint failed: rx_claim_alerts.record_id");
        let msg = err.to_string();
        assert!(msg.starts_with("store rejected:"), "got: {msg}");
        assert!(msg.contains("UNIQUE constraint failed"));
    }

    #[test]
    fn connection_error_reports_attempts() {
        let err = LoadError::Connection {
            attempts: 4,
            message: "refused".to_string(),
        };
        assert_eq!(err.to_string(), "connection failed after 4 attempt(s): refused");
    }

    #[test]
    fn store_error_converts_transparently() {
        let err: LoadError = StoreError::timeout("interrupted").into();
        assert_eq!(err.to_string(), "store timeout: interrupted");
    }
}
