//! Storage error types.

use std::fmt;

/// The blob store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOp {
    Get,
    Put,
    Delete,
    List,
    Clear,
}

impl fmt::Display for BlobOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Clear => "clear",
        })
    }
}

/// Errors raised by a blob store.
///
/// `target` is the key (or key prefix) the operation addressed, empty for
/// whole-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing file could not be opened or created.
    #[error("cannot open blob store at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A single operation failed inside the backend.
    #[error("blob {op} failed for '{target}': {reason}")]
    Backend {
        op: BlobOp,
        target: String,
        reason: String,
    },

    /// A transaction could not be started or committed.
    #[error("blob store transaction failed: {reason}")]
    Transaction { reason: String },

    /// The blocking task running the operation died.
    #[error("blob store worker for {op} failed: {reason}")]
    Worker { op: BlobOp, reason: String },
}

impl StorageError {
    pub(crate) fn backend(op: BlobOp, target: &str, reason: impl fmt::Display) -> Self {
        Self::Backend {
            op,
            target: target.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// The operation that failed, if the error is tied to one.
    pub fn op(&self) -> Option<BlobOp> {
        match self {
            Self::Backend { op, .. } | Self::Worker { op, .. } => Some(*op),
            Self::Open { .. } | Self::Transaction { .. } => None,
        }
    }
}
