//! Certstore Core - Certificate storage with distributed locking
//!
//! This crate provides:
//! - The record store over the certificate storage collection
//! - The [`Storage`] interface and its [`CertificateStorage`] implementation
//! - Storage options

pub mod model;
pub mod options;
pub mod service;
pub mod storage;

pub use model::{KeyInfo, Presence};
pub use options::StorageOptions;
pub use service::RecordStore;
pub use storage::{CertificateStorage, Storage};

// Re-exports so callers need only this crate
pub use certstore_common::{StorageError, StorageResult};
pub use certstore_consistency::{LockOptions, LockState, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
