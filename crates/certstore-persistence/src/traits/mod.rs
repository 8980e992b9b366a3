//! Persistence traits for the storage abstraction layer
//!
//! This module defines the operations the storage and lock services consume
//! from a backend: the in-memory maps or MongoDB collections.

pub mod lock;
pub mod record;

pub use lock::LockPersistence;
pub use record::RecordPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified persistence service trait
///
/// The record and lock operations live in disjoint collections of the same
/// backend and never touch each other's documents.
#[async_trait]
pub trait PersistenceService: RecordPersistence + LockPersistence + Send + Sync {
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Create the unique key indexes and the lock expiry index
    async fn ensure_indexes(&self) -> anyhow::Result<()>;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
