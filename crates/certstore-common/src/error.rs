//! Error types for certstore
//!
//! This module defines:
//! - `StorageError`: the error taxonomy surfaced to callers of the storage facade
//! - `StorageResult`: shorthand result alias
//!
//! Backend faults are carried as boxed `dyn Error` so driver types never leak
//! through the public API.

/// Boxed source error from the underlying medium
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used by the storage and lock services
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage and locking error types
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// The requested key has no record
    #[error("{op}: key '{key}' not found")]
    NotFound { op: &'static str, key: String },

    /// The caller's cancellation token fired before the operation completed
    #[error("{op}: cancelled while waiting on key '{key}'")]
    Cancelled { op: &'static str, key: String },

    /// The underlying medium was unreachable or returned an unexpected fault
    #[error("{op} failed for key '{key}': {source}")]
    Medium {
        op: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    /// No lock document matched both the key and this instance's identity
    #[error("unlock: no lock on '{key}' held by instance '{holder}'")]
    ReleaseMismatch { key: String, holder: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn not_found(op: &'static str, key: impl Into<String>) -> Self {
        StorageError::NotFound {
            op,
            key: key.into(),
        }
    }

    pub fn cancelled(op: &'static str, key: impl Into<String>) -> Self {
        StorageError::Cancelled {
            op,
            key: key.into(),
        }
    }

    /// Wrap a backend error with the operation name and key
    pub fn medium(op: &'static str, key: impl Into<String>, source: anyhow::Error) -> Self {
        StorageError::Medium {
            op,
            key: key.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled { .. })
    }

    pub fn is_release_mismatch(&self) -> bool {
        matches!(self, StorageError::ReleaseMismatch { .. })
    }

    /// The key the failed operation was addressing, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            StorageError::NotFound { key, .. }
            | StorageError::Cancelled { key, .. }
            | StorageError::Medium { key, .. }
            | StorageError::ReleaseMismatch { key, .. } => Some(key),
            StorageError::Config(_) => None,
        }
    }
}
