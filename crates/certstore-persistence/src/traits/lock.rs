//! Lock persistence trait
//!
//! The lock collection only needs a unique insert, a delete scoped by
//! key and holder, and a point read. Expired documents are removed by the
//! backend itself.

use async_trait::async_trait;

use crate::model::{InsertOutcome, LockDocument};

/// Lock document persistence operations
#[async_trait]
pub trait LockPersistence: Send + Sync {
    /// Insert `lock` unless a document with the same key exists
    ///
    /// A uniqueness violation is reported as `InsertOutcome::Conflict`, never
    /// as an error. Errors are reserved for medium faults.
    async fn lock_insert(&self, lock: &LockDocument) -> anyhow::Result<InsertOutcome>;

    /// Delete the lock on `key` only if it is held by `instance`
    async fn lock_delete(&self, key: &str, instance: &str) -> anyhow::Result<u64>;

    /// Find the lock document on `key`, expired or not
    async fn lock_find_one(&self, key: &str) -> anyhow::Result<Option<LockDocument>>;
}
