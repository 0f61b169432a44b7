//! Error types for the sync engine.

use driftsync_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for filesystem collaborator calls.
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// Result type for metadata store calls.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Errors that can occur during a sync-down cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The cycle must not start.
    #[error("precondition failed: {0}")]
    Precondition(PreconditionFailure),

    /// Remote store or network failure.
    #[error("transfer error: {message}")]
    Transfer {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A state that must be impossible actually occurred.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Executing a filesystem action failed.
    #[error("{action} failed: {source}")]
    FileSystemAction {
        /// Description of the failed action.
        action: String,
        /// Underlying failure.
        #[source]
        source: FileSystemError,
    },

    /// Local metadata store failure.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Encoding or decoding of a remote object failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local object cache failure.
    #[error("object cache error for {name}: {source}")]
    Cache {
        /// Object name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transfer error.
    pub fn transfer_retryable(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transfer error.
    pub fn transfer_fatal(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a consistency violation.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation(message.into())
    }

    /// Wraps a filesystem failure with the action that caused it.
    pub fn file_system(action: impl Into<String>, source: FileSystemError) -> Self {
        Self::FileSystemAction {
            action: action.into(),
            source,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transfer { retryable, .. } => *retryable,
            SyncError::FileSystemAction { .. } => true,
            _ => false,
        }
    }

    /// Returns true for logic errors that must abort the whole cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::ConsistencyViolation(_))
    }
}

/// Reasons a cycle refuses to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionFailure {
    /// Another maintenance operation holds the remote.
    #[error("{operation} operation of {client} is running on the remote")]
    ConcurrentMaintenance {
        /// Replica running the operation.
        client: String,
        /// Operation name.
        operation: String,
    },

    /// A configured option is not supported.
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),
}

/// Filesystem collaborator failures.
#[derive(Error, Debug)]
pub enum FileSystemError {
    /// Underlying I/O failure.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// Affected path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The filesystem is not in the state the action expected.
    #[error("unexpected state at {path:?}: {reason}")]
    Unexpected {
        /// Affected path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
}

impl FileSystemError {
    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an unexpected-state error for `path`.
    pub fn unexpected(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Unexpected {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Metadata store failures.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is malformed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Commit or rollback without an open transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A transaction is already open.
    #[error("a transaction is already in progress")]
    TransactionActive,

    /// A referenced version is unknown.
    #[error("unknown database version {0}")]
    UnknownVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transfer_retryable("connection lost").is_retryable());
        assert!(!SyncError::transfer_fatal("bucket gone").is_retryable());
        assert!(!SyncError::consistency("missing chunk").is_retryable());
        assert!(SyncError::consistency("missing chunk").is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Precondition(PreconditionFailure::ConcurrentMaintenance {
            client: "B".into(),
            operation: "cleanup".into(),
        });
        assert_eq!(
            err.to_string(),
            "precondition failed: cleanup operation of B is running on the remote"
        );

        let err = SyncError::file_system(
            "delete a.txt",
            FileSystemError::unexpected("a.txt", "not empty"),
        );
        assert!(err.to_string().starts_with("delete a.txt failed"));
    }
}
