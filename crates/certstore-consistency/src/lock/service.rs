//! Lease Lock Service Implementation
//!
//! Provides:
//! - Blocking acquire with a fixed polling interval and cancellation
//! - Single-attempt acquire
//! - Release scoped by holder identity
//!
//! The only cross-process coordination is the backend's unique insert on the
//! lock key. Expired leases are removed by the backend, never by this service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, describe_counter};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certstore_common::{StorageError, StorageResult};
use certstore_persistence::{InsertOutcome, LockDocument, LockPersistence};

use super::model::{LockOptions, LockState};

const LOCK_ACQUIRED_TOTAL: &str = "certstore_lock_acquired_total";
const LOCK_CONFLICTS_TOTAL: &str = "certstore_lock_conflicts_total";
const LOCK_CANCELLED_TOTAL: &str = "certstore_lock_cancelled_total";
const LOCK_RELEASE_MISMATCH_TOTAL: &str = "certstore_lock_release_mismatch_total";

/// Register lock metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(LOCK_ACQUIRED_TOTAL, "Total number of locks acquired");
    describe_counter!(
        LOCK_CONFLICTS_TOTAL,
        "Total number of acquisition attempts that hit a live lock"
    );
    describe_counter!(
        LOCK_CANCELLED_TOTAL,
        "Total number of acquisitions abandoned on cancellation"
    );
    describe_counter!(
        LOCK_RELEASE_MISMATCH_TOTAL,
        "Total number of releases that found no lock held by this instance"
    );
}

/// Distributed lock service trait
#[async_trait]
pub trait DistributedLockService: Send + Sync {
    /// Wait until the lock on `key` is held or `cancel` fires
    ///
    /// Cancellation is observed between attempts and during every wait. An
    /// insert already sent to the backend is allowed to finish, so the delay
    /// after `cancel` fires is bounded by one in-flight insert.
    async fn acquire(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()>;

    /// Make a single acquisition attempt
    ///
    /// Returns `false` when another holder, local or remote, has the key.
    async fn try_acquire(&self, key: &str) -> StorageResult<bool>;

    /// Release the lock on `key` held by this instance
    async fn release(&self, key: &str) -> StorageResult<()>;

    /// Read the current lock state of `key`
    async fn state(&self, key: &str) -> StorageResult<LockState>;

    /// Holder identity written into every lock document
    fn instance_id(&self) -> &str;
}

/// Local hold on a key, valid until its lease runs out
struct LocalHold {
    _guard: OwnedMutexGuard<()>,
    deadline: Instant,
}

/// Lock manager backed by a unique-insert lock collection
///
/// `instance_id` alone cannot tell two callers in the same process apart, so
/// each key also has a local async mutex. It is taken before the remote
/// insert and kept until the matching release or until the lease deadline,
/// whichever comes first. A hold whose lease has run out is evicted by the
/// next local acquirer, the same way the backend drops the expired document.
pub struct LeaseLockService {
    persistence: Arc<dyn LockPersistence>,
    instance_id: String,
    options: LockOptions,
    local: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<String, LocalHold>,
}

impl LeaseLockService {
    pub fn new(
        persistence: Arc<dyn LockPersistence>,
        instance_id: impl Into<String>,
        options: LockOptions,
    ) -> Self {
        let instance_id = instance_id.into();
        info!(
            instance = %instance_id,
            ttl_secs = options.ttl.as_secs(),
            retry_ms = options.retry.interval.as_millis() as u64,
            "Lease lock service initialized"
        );
        Self {
            persistence,
            instance_id,
            options,
            local: DashMap::new(),
            held: DashMap::new(),
        }
    }

    /// Number of keys this process currently holds
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    fn local_mutex(&self, key: &str) -> Arc<Mutex<()>> {
        self.local
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the local mutex entry once nobody holds or waits on it
    fn forget_local(&self, key: &str) {
        self.local
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// How long a local waiter should wait before checking for a stale hold
    fn local_wait(&self, key: &str) -> Duration {
        match self.held.get(key) {
            Some(hold) => hold.deadline.saturating_duration_since(Instant::now()),
            // Holder is still inserting; its deadline is not known yet
            None => self.options.retry.interval,
        }
    }

    /// Evict the local hold on `key` if its lease has run out
    fn evict_stale(&self, key: &str) -> bool {
        let now = Instant::now();
        let evicted = self
            .held
            .remove_if(key, |_, hold| hold.deadline <= now)
            .is_some();
        if evicted {
            warn!(
                key = %key,
                instance = %self.instance_id,
                "Evicted local hold whose lease expired without release"
            );
        }
        evicted
    }

    fn cancelled(&self, key: &str) -> StorageError {
        counter!(LOCK_CANCELLED_TOTAL).increment(1);
        debug!(key = %key, instance = %self.instance_id, "Lock acquisition cancelled");
        StorageError::cancelled("lock", key)
    }

    /// Take the local mutex, evicting holds that outlived their lease
    async fn acquire_local(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<OwnedMutexGuard<()>> {
        let mutex = self.local_mutex(key);
        loop {
            let wait = self.local_wait(key);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(mutex);
                    self.forget_local(key);
                    return Err(self.cancelled(key));
                }
                guard = mutex.clone().lock_owned() => return Ok(guard),
                _ = tokio::time::sleep(wait) => {
                    self.evict_stale(key);
                }
            }
        }
    }

    /// One insert attempt; the local lease deadline when it wins
    async fn insert_lease(&self, key: &str) -> StorageResult<Option<Instant>> {
        let started = Instant::now();
        let lock = LockDocument::new(
            key,
            self.instance_id.as_str(),
            self.options.lease_deadline(Utc::now()),
        );
        let outcome = self
            .persistence
            .lock_insert(&lock)
            .await
            .map_err(|e| StorageError::medium("lock", key, e))?;
        match outcome {
            InsertOutcome::Inserted => Ok(Some(started + self.options.ttl)),
            InsertOutcome::Conflict => Ok(None),
        }
    }

    /// Poll the lock collection until the insert wins
    async fn acquire_remote(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<Instant> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(key));
            }
            attempt += 1;

            match self.insert_lease(key).await? {
                Some(deadline) => {
                    counter!(LOCK_ACQUIRED_TOTAL).increment(1);
                    debug!(key = %key, instance = %self.instance_id, attempt, "Lock acquired");
                    return Ok(deadline);
                }
                None => {
                    counter!(LOCK_CONFLICTS_TOTAL).increment(1);
                    let delay = self.options.retry.next_delay();
                    debug!(
                        key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Lock held elsewhere, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(self.cancelled(key)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn hold(&self, key: &str, guard: OwnedMutexGuard<()>, deadline: Instant) {
        self.held.insert(
            key.to_string(),
            LocalHold {
                _guard: guard,
                deadline,
            },
        );
    }
}

#[async_trait]
impl DistributedLockService for LeaseLockService {
    async fn acquire(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(self.cancelled(key));
        }
        let guard = self.acquire_local(key, cancel).await?;

        match self.acquire_remote(key, cancel).await {
            Ok(deadline) => {
                self.hold(key, guard, deadline);
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.forget_local(key);
                Err(e)
            }
        }
    }

    async fn try_acquire(&self, key: &str) -> StorageResult<bool> {
        let mutex = self.local_mutex(key);
        let guard = match mutex.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) if self.evict_stale(key) => match mutex.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => return Ok(false),
            },
            Err(_) => return Ok(false),
        };

        match self.insert_lease(key).await {
            Ok(Some(deadline)) => {
                counter!(LOCK_ACQUIRED_TOTAL).increment(1);
                debug!(key = %key, instance = %self.instance_id, "Lock acquired");
                self.hold(key, guard, deadline);
                Ok(true)
            }
            Ok(None) => {
                counter!(LOCK_CONFLICTS_TOTAL).increment(1);
                drop(guard);
                self.forget_local(key);
                Ok(false)
            }
            Err(e) => {
                drop(guard);
                self.forget_local(key);
                Err(e)
            }
        }
    }

    async fn release(&self, key: &str) -> StorageResult<()> {
        let deleted = self.persistence.lock_delete(key, &self.instance_id).await;

        // The local hold ends with the release call whatever the store says
        self.held.remove(key);
        self.forget_local(key);

        let deleted = deleted.map_err(|e| StorageError::medium("unlock", key, e))?;
        if deleted == 0 {
            counter!(LOCK_RELEASE_MISMATCH_TOTAL).increment(1);
            warn!(
                key = %key,
                instance = %self.instance_id,
                "No lock held by this instance, lease may have expired"
            );
            return Err(StorageError::ReleaseMismatch {
                key: key.to_string(),
                holder: self.instance_id.clone(),
            });
        }

        debug!(key = %key, instance = %self.instance_id, "Lock released");
        Ok(())
    }

    async fn state(&self, key: &str) -> StorageResult<LockState> {
        self.persistence
            .lock_find_one(key)
            .await
            .map(LockState::from)
            .map_err(|e| StorageError::medium("lock state", key, e))
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use certstore_persistence::MemoryPersistService;

    use super::*;
    use crate::lock::RetryPolicy;

    fn fast_options() -> LockOptions {
        LockOptions::default()
            .with_ttl(Duration::from_secs(60))
            .with_retry(RetryPolicy::fixed(Duration::from_millis(10)))
    }

    fn service(store: Arc<MemoryPersistService>, instance: &str) -> LeaseLockService {
        LeaseLockService::new(store, instance, fast_options())
    }

    /// Backend whose lock operations always fail
    struct UnreachableLocks {
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl LockPersistence for UnreachableLocks {
        async fn lock_insert(&self, _lock: &LockDocument) -> anyhow::Result<InsertOutcome> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("server selection timeout"))
        }

        async fn lock_delete(&self, _key: &str, _instance: &str) -> anyhow::Result<u64> {
            Err(anyhow::anyhow!("server selection timeout"))
        }

        async fn lock_find_one(&self, _key: &str) -> anyhow::Result<Option<LockDocument>> {
            Err(anyhow::anyhow!("server selection timeout"))
        }
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let store = Arc::new(MemoryPersistService::new());
        let svc = service(store.clone(), "node-a");
        let cancel = CancellationToken::new();

        svc.acquire("cert-x", &cancel).await.unwrap();
        assert_eq!(svc.held_count(), 1);

        let state = svc.state("cert-x").await.unwrap();
        assert_eq!(state.holder(), Some("node-a"));

        svc.release("cert-x").await.unwrap();
        assert_eq!(svc.held_count(), 0);
        assert_eq!(svc.state("cert-x").await.unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_try_acquire_conflict() {
        let store = Arc::new(MemoryPersistService::new());
        let a = service(store.clone(), "node-a");
        let b = service(store.clone(), "node-b");

        assert!(a.try_acquire("cert-x").await.unwrap());
        assert!(!b.try_acquire("cert-x").await.unwrap());
        // Same process, same key: held locally
        assert!(!a.try_acquire("cert-x").await.unwrap());

        a.release("cert-x").await.unwrap();
        assert!(b.try_acquire("cert-x").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_other_instance_is_mismatch() {
        let store = Arc::new(MemoryPersistService::new());
        let a = service(store.clone(), "node-a");
        let b = service(store.clone(), "node-b");
        let cancel = CancellationToken::new();

        a.acquire("cert-x", &cancel).await.unwrap();

        let err = b.release("cert-x").await.unwrap_err();
        assert!(err.is_release_mismatch());
        assert_eq!(
            a.state("cert-x").await.unwrap().holder(),
            Some("node-a")
        );
    }

    #[tokio::test]
    async fn test_release_without_lock_is_mismatch() {
        let store = Arc::new(MemoryPersistService::new());
        let a = service(store, "node-a");
        assert!(a.release("never-locked").await.unwrap_err().is_release_mismatch());
    }

    #[tokio::test]
    async fn test_cancel_while_contended() {
        let store = Arc::new(MemoryPersistService::new());
        let a = service(store.clone(), "node-a");
        let b = service(store.clone(), "node-b");

        a.acquire("cert-x", &CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = b.acquire("cert-x", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(b.held_count(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_makes_no_attempt() {
        let locks = Arc::new(UnreachableLocks {
            inserts: AtomicUsize::new(0),
        });
        let svc = LeaseLockService::new(locks.clone(), "node-a", fast_options());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(svc.acquire("cert-x", &cancel).await.unwrap_err().is_cancelled());
        assert_eq!(locks.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_medium_error_fails_fast() {
        let locks = Arc::new(UnreachableLocks {
            inserts: AtomicUsize::new(0),
        });
        let svc = LeaseLockService::new(locks.clone(), "node-a", fast_options());

        let err = svc
            .acquire("cert-x", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Medium { op: "lock", .. }));
        assert_eq!(locks.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(svc.held_count(), 0);
    }

    #[tokio::test]
    async fn test_release_medium_error_is_wrapped() {
        let svc = LeaseLockService::new(
            Arc::new(UnreachableLocks {
                inserts: AtomicUsize::new(0),
            }),
            "node-a",
            fast_options(),
        );
        let err = svc.release("cert-x").await.unwrap_err();
        assert!(matches!(err, StorageError::Medium { op: "unlock", .. }));
        assert_eq!(err.key(), Some("cert-x"));
    }

    #[tokio::test]
    async fn test_local_callers_are_serialized() {
        let store = Arc::new(MemoryPersistService::new());
        let svc = Arc::new(service(store, "node-a"));
        let cancel = CancellationToken::new();

        svc.acquire("cert-x", &cancel).await.unwrap();

        let waiter = {
            let svc = svc.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { svc.acquire("cert-x", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        svc.release("cert-x").await.unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(svc.held_count(), 1);
    }

    fn short_lease() -> LockOptions {
        LockOptions::default()
            .with_ttl(Duration::from_millis(150))
            .with_retry(RetryPolicy::fixed(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn test_unreleased_local_hold_expires_with_lease() {
        let store = Arc::new(
            MemoryPersistService::new().with_expiry_sweeper(Duration::from_millis(10)),
        );
        let svc = LeaseLockService::new(store, "node-a", short_lease());
        let cancel = CancellationToken::new();

        // Holder never releases
        svc.acquire("cert-x", &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(2), svc.acquire("cert-x", &cancel))
            .await
            .expect("expired local hold should be evicted")
            .unwrap();
        assert_eq!(svc.held_count(), 1);
        svc.release("cert-x").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_waiter_takes_over_after_lease() {
        let store = Arc::new(
            MemoryPersistService::new().with_expiry_sweeper(Duration::from_millis(10)),
        );
        let svc = Arc::new(LeaseLockService::new(store, "node-a", short_lease()));
        let cancel = CancellationToken::new();

        svc.acquire("cert-x", &cancel).await.unwrap();
        let started = Instant::now();

        let waiter = {
            let svc = svc.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { svc.acquire("cert-x", &cancel).await })
        };

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should not be blocked past the lease")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(svc.state("cert-x").await.unwrap().holder(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_try_acquire_evicts_stale_hold() {
        let store = Arc::new(MemoryPersistService::new());
        let svc = LeaseLockService::new(store.clone(), "node-a", short_lease());

        assert!(svc.try_acquire("cert-x").await.unwrap());
        assert!(!svc.try_acquire("cert-x").await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.sweep_expired(), 1);

        assert!(svc.try_acquire("cert-x").await.unwrap());
        assert_eq!(svc.held_count(), 1);
    }

    /// Backend whose inserts take a while and always conflict
    struct SlowLocks {
        delay: Duration,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl LockPersistence for SlowLocks {
        async fn lock_insert(&self, _lock: &LockDocument) -> anyhow::Result<InsertOutcome> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(InsertOutcome::Conflict)
        }

        async fn lock_delete(&self, _key: &str, _instance: &str) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn lock_find_one(&self, _key: &str) -> anyhow::Result<Option<LockDocument>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_cancel_waits_for_in_flight_insert_only() {
        let locks = Arc::new(SlowLocks {
            delay: Duration::from_millis(200),
            inserts: AtomicUsize::new(0),
        });
        let svc = LeaseLockService::new(locks.clone(), "node-a", fast_options());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = svc.acquire("cert-x", &cancel).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_cancelled());
        assert_eq!(locks.inserts.load(Ordering::SeqCst), 1);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(1));
    }
}
