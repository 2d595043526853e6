//! Rollwin - Distributed Sliding-Window Rate Limiter
//!
//! This crate decides whether a call on a key fits a quota over a trailing
//! time window. Attempts are recorded as timestamps in a shared sorted-set
//! store, so every instance pointed at the same store enforces one limit.
//! Each check prunes, records, refreshes the TTL and counts in a single atomic
//! batch.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use ratelimit::{Decision, SlidingWindowLimiter, WindowLength};
