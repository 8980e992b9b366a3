//! Certstore Consistency - Cross-process mutual exclusion
//!
//! This crate provides lease locks on certificate keys. A lock is a document
//! in the shared lock collection; the backend's unique index on the key picks
//! the winner among concurrent acquirers, and its expiry mechanism reclaims
//! leases left behind by crashed holders.

pub mod lock;

// Re-export lock types
pub use lock::{
    DistributedLockService, LeaseLockService, LockOptions, LockState, RetryPolicy,
    describe_metrics,
};
