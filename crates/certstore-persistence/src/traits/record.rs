//! Record persistence trait
//!
//! Defines the keyed read/write/query operations on the storage collection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::RecordDocument;

/// Certificate record persistence operations
#[async_trait]
pub trait RecordPersistence: Send + Sync {
    /// Insert or overwrite the record for `key`
    async fn record_upsert(
        &self,
        key: &str,
        value: &[u8],
        modified_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Find the record for `key`
    async fn record_find_one(&self, key: &str) -> anyhow::Result<Option<RecordDocument>>;

    /// Delete the record for `key`, returning the number of documents removed
    async fn record_delete(&self, key: &str) -> anyhow::Result<u64>;

    /// Count records matching `key`
    async fn record_count(&self, key: &str) -> anyhow::Result<u64>;

    /// Keys of every record whose key starts with `prefix`
    async fn record_keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}
