// In-memory persistence backend
// Keeps both collections in DashMaps; a background task plays the role of the
// database TTL monitor and drops expired lock documents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::model::{InsertOutcome, LockDocument, RecordDocument, StorageMode};
use crate::traits::{LockPersistence, PersistenceService, RecordPersistence};

/// Default interval of the expiry sweeper
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Single-process persistence using DashMap
///
/// Suitable for tests and single-node deployments. Lock expiry is passive:
/// documents past `expires_at` stay visible until the sweeper removes them.
pub struct MemoryPersistService {
    records: Arc<DashMap<String, RecordDocument>>,
    locks: Arc<DashMap<String, LockDocument>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl Default for MemoryPersistService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersistService {
    /// Create an empty backend without a sweeper
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            sweeper: None,
        }
    }

    /// Start the background expiry sweeper
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_expiry_sweeper(mut self, interval: Duration) -> Self {
        let locks = self.locks.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = sweep(&locks, Utc::now());
                if removed > 0 {
                    debug!(count = removed, "Swept expired lock documents");
                }
            }
        });

        if let Some(previous) = self.sweeper.replace(handle) {
            previous.abort();
        }
        self
    }

    /// Remove every lock document expired at the current time
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.locks, Utc::now())
    }

    /// Number of lock documents currently present, expired ones included
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn record_len(&self) -> usize {
        self.records.len()
    }
}

impl Drop for MemoryPersistService {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn sweep(locks: &DashMap<String, LockDocument>, now: DateTime<Utc>) -> usize {
    let before = locks.len();
    locks.retain(|_, lock| !lock.is_expired_at(now));
    before.saturating_sub(locks.len())
}

#[async_trait]
impl RecordPersistence for MemoryPersistService {
    async fn record_upsert(
        &self,
        key: &str,
        value: &[u8],
        modified_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.records.insert(
            key.to_string(),
            RecordDocument {
                key: key.to_string(),
                value: value.to_vec(),
                modified_at,
            },
        );
        Ok(())
    }

    async fn record_find_one(&self, key: &str) -> anyhow::Result<Option<RecordDocument>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn record_delete(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self.records.remove(key).map_or(0, |_| 1))
    }

    async fn record_count(&self, key: &str) -> anyhow::Result<u64> {
        Ok(u64::from(self.records.contains_key(key)))
    }

    async fn record_keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl LockPersistence for MemoryPersistService {
    async fn lock_insert(&self, lock: &LockDocument) -> anyhow::Result<InsertOutcome> {
        // The shard write lock held by `entry` makes check-and-insert atomic
        match self.locks.entry(lock.key.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn lock_delete(&self, key: &str, instance: &str) -> anyhow::Result<u64> {
        let removed = self
            .locks
            .remove_if(key, |_, lock| lock.is_held_by(instance));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn lock_find_one(&self, key: &str) -> anyhow::Result<Option<LockDocument>> {
        Ok(self.locks.get(key).map(|l| l.value().clone()))
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        // Map keys already enforce uniqueness
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
