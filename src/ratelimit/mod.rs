//! Sliding-window rate limiting logic.

mod limiter;
mod rules;
mod window;

pub use limiter::SlidingWindowLimiter;
pub use rules::{QuotaPolicy, QuotaRule};
pub use window::{Decision, RecordIdentity, WindowLength, WindowStatus};
