//! Lock options and state model

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use certstore_common::{DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_LOCK_TTL};
use certstore_persistence::LockDocument;

/// Observed state of a key in the lock collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No lock document exists
    Unlocked,
    /// A lock document exists; it may be past `expires_at` but not yet swept
    Locked(LockDocument),
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked(_))
    }

    pub fn holder(&self) -> Option<&str> {
        match self {
            LockState::Locked(lock) => Some(&lock.instance),
            LockState::Unlocked => None,
        }
    }
}

impl From<Option<LockDocument>> for LockState {
    fn from(value: Option<LockDocument>) -> Self {
        value.map_or(LockState::Unlocked, LockState::Locked)
    }
}

/// Delay between acquisition attempts while a key is contended
///
/// Every waiter polls on the same interval unless jitter is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Upper bound of a random delay added to each wait
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_LOCK_RETRY_INTERVAL)
    }
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.interval + Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Lease and retry settings for the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lease length of each acquired lock
    pub ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Expiry of a lease taken at `now`
    pub fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = LockOptions::default();
        assert_eq!(options.ttl, Duration::from_secs(60));
        assert_eq!(options.retry.interval, Duration::from_secs(2));
        assert_eq!(options.retry.jitter, Duration::ZERO);
    }

    #[test]
    fn test_fixed_retry_has_no_jitter() {
        let retry = RetryPolicy::fixed(Duration::from_millis(250));
        for _ in 0..10 {
            assert_eq!(retry.next_delay(), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let retry =
            RetryPolicy::fixed(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let delay = retry.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_lease_deadline() {
        let options = LockOptions::default().with_ttl(Duration::from_secs(5));
        let now = Utc::now();
        assert_eq!(options.lease_deadline(now), now + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_lock_state_from_document() {
        assert_eq!(LockState::from(None), LockState::Unlocked);

        let lock = LockDocument::new("cert-x", "node-a", Utc::now());
        let state = LockState::from(Some(lock));
        assert!(state.is_locked());
        assert_eq!(state.holder(), Some("node-a"));
    }
}
