//! Lease-based Lock Implementation
//!
//! This module provides:
//! - Lock options, retry policy and state model
//! - Acquire/release service over a unique-insert lock collection
//! - Metric descriptions for lock contention

mod model;
mod service;

pub use model::*;
pub use service::*;
