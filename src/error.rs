//! Error taxonomy for the index store.
//!
//! Every library operation returns [`Result`]. Variants separate "retry the whole operation"
//! ([`IndexError::StorageBusy`]) from "this operation failed, rebuild the index"
//! ([`IndexError::StorageUnavailable`]). Nothing here is fatal for the host process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index store unavailable ({op}) at {}: {reason}", .path.display())]
    StorageUnavailable {
        op: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("index store busy ({op}) after {attempts} attempts")]
    StorageBusy { op: &'static str, attempts: u32 },

    #[error("index store corrupt at {}: {reason}", .path.display())]
    SchemaCorrupt { path: PathBuf, reason: String },

    #[error("index schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    #[error("schema migration {from} -> {to} failed: {reason}")]
    MigrationFailed { from: i64, to: i64, reason: String },

    #[error("constraint violation ({op}): {reason}")]
    ConstraintViolation { op: &'static str, reason: String },

    #[error("database error ({op}): {source}")]
    Database {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error ({op}) at {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock {name} not acquired within {waited:?}")]
    LockTimeout { name: String, waited: Duration },

    #[error("operation cancelled; completed batches were committed")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Map a rusqlite error onto the taxonomy. `path` is the store file the operation touched.
    pub fn classify(op: &'static str, path: &Path, err: rusqlite::Error) -> Self {
        let Some(code) = err.sqlite_error_code() else {
            return IndexError::Database { op, source: err };
        };
        match code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                IndexError::StorageBusy { op, attempts: 1 }
            }
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => IndexError::SchemaCorrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
            ErrorCode::CannotOpen
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::PermissionDenied
            | ErrorCode::SystemIoFailure
            | ErrorCode::NoLargeFileSupport
            | ErrorCode::FileLockingProtocolFailed => IndexError::StorageUnavailable {
                op,
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
            ErrorCode::ConstraintViolation => IndexError::ConstraintViolation {
                op,
                reason: err.to_string(),
            },
            _ => IndexError::Database { op, source: err },
        }
    }

    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        IndexError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn unavailable(op: &'static str, path: &Path, reason: impl Into<String>) -> Self {
        IndexError::StorageUnavailable {
            op,
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Transient lock contention; the caller may retry the whole operation.
    pub fn is_busy(&self) -> bool {
        matches!(self, IndexError::StorageBusy { .. })
    }

    /// True for errors that only the recovery path handles.
    pub fn is_corruption(&self) -> bool {
        matches!(self, IndexError::SchemaCorrupt { .. })
    }

    /// Whether retrying the same operation later can succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::StorageBusy { .. } | IndexError::LockTimeout { .. }
        )
    }

    /// The index is a disposable cache: no error justifies taking the host process down.
    pub fn is_fatal_for_process(&self) -> bool {
        false
    }
}

/// Attach an operation name and store path to rusqlite results.
pub(crate) trait SqlResultExt<T> {
    fn op(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> SqlResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn op(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| IndexError::classify(op, path, e))
    }
}
