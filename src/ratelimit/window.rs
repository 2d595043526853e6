//! Window length, record identity and check outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Length of the trailing window.
///
/// Records are timestamped in milliseconds, so the window is converted with a
/// factor of exactly 1000 per second. The length is never shorter than one
/// second: a zero TTL would delete the key in the same batch that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowLength {
    secs: u64,
}

impl WindowLength {
    pub const MILLIS_PER_SECOND: u64 = 1000;

    /// A window of `secs` seconds (at least 1).
    pub fn from_secs(secs: u64) -> Self {
        Self { secs: secs.max(1) }
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    pub fn as_millis(&self) -> u64 {
        self.secs.saturating_mul(Self::MILLIS_PER_SECOND)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    /// Newest timestamp that is already outside the window at `now_millis`.
    ///
    /// Records scored at or below the cutoff are stale. `None` means the clock
    /// has not yet run a full window past zero, so nothing can be stale.
    pub fn cutoff(&self, now_millis: u64) -> Option<u64> {
        now_millis.checked_sub(self.as_millis())
    }
}

impl Default for WindowLength {
    fn default() -> Self {
        Self::from_secs(60)
    }
}

/// How the member of a window record is named.
///
/// The score of a record is always its timestamp. With `Timestamp` the member
/// is the timestamp too, so two attempts in the same millisecond collapse into
/// one record. `Unique` appends a random suffix so each attempt is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordIdentity {
    #[default]
    Unique,
    Timestamp,
}

impl RecordIdentity {
    /// Member name for an attempt recorded at `now_millis`.
    pub fn member_for(&self, now_millis: u64) -> String {
        match self {
            RecordIdentity::Unique => {
                format!("{}-{}", now_millis, uuid::Uuid::new_v4().simple())
            }
            RecordIdentity::Timestamp => now_millis.to_string(),
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Admitted,
    Denied,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }
}

impl From<Decision> for bool {
    fn from(decision: Decision) -> Self {
        decision.is_admitted()
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Admitted => write!(f, "admitted"),
            Decision::Denied => write!(f, "denied"),
        }
    }
}

/// Full result of one recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    /// The window key
    pub key: String,
    /// Admit or deny
    pub decision: Decision,
    /// Live records after pruning, including this attempt
    pub count: u64,
    /// Quota the attempt was checked against
    pub quota: i64,
    /// Attempts left before the quota is exceeded
    pub remaining: u64,
    /// How long until an attempt could be admitted again, when denied
    pub retry_after: Option<Duration>,
}

/// Whether `count` live records exceed `quota`.
///
/// A quota of zero or below is exceeded by any count, including the attempt
/// being checked.
pub fn exceeds(count: u64, quota: i64) -> bool {
    match u64::try_from(quota) {
        Ok(quota) => count > quota,
        Err(_) => true,
    }
}

/// Attempts still admissible after `count` live records.
pub fn remaining(count: u64, quota: i64) -> u64 {
    u64::try_from(quota).map_or(0, |quota| quota.saturating_sub(count))
}

/// Time until the next attempt would be admitted.
///
/// `scores` are the live record timestamps, this attempt included. The next
/// attempt adds one more record, so the oldest `count - quota + 1` records must
/// leave the window first. Returns `None` when the count is within quota or
/// when no amount of waiting can admit an attempt (quota of zero or below).
///
/// The hint is a lower bound. Every attempt recorded on the key before then,
/// by this caller retrying or by anyone else, pushes the real wait further out.
pub fn retry_after(
    scores: &[u64],
    quota: i64,
    window: WindowLength,
    now_millis: u64,
) -> Option<Duration> {
    let quota = usize::try_from(quota).ok().filter(|q| *q > 0)?;
    if scores.len() <= quota {
        return None;
    }

    let mut sorted = scores.to_vec();
    sorted.sort_unstable();

    // Index of the newest record that must be pruned.
    let blocking = sorted[sorted.len() - quota];
    let admit_at = blocking.saturating_add(window.as_millis());
    Some(Duration::from_millis(admit_at.saturating_sub(now_millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_length_scales_by_thousand() {
        let window = WindowLength::from_secs(60);
        assert_eq!(window.as_millis(), 60_000);
        assert_eq!(window.as_duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_window_length_minimum() {
        assert_eq!(WindowLength::from_secs(0).as_secs(), 1);
        assert_eq!(WindowLength::default().as_secs(), 60);
    }

    #[test]
    fn test_cutoff() {
        let window = WindowLength::from_secs(60);
        assert_eq!(window.cutoff(0), None);
        assert_eq!(window.cutoff(59_999), None);
        assert_eq!(window.cutoff(60_000), Some(0));
        assert_eq!(window.cutoff(61_000), Some(1_000));
    }

    #[test]
    fn test_record_identity() {
        assert_eq!(RecordIdentity::Timestamp.member_for(1234), "1234");

        let a = RecordIdentity::Unique.member_for(1234);
        let b = RecordIdentity::Unique.member_for(1234);
        assert!(a.starts_with("1234-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_exceeds() {
        assert!(!exceeds(2, 2));
        assert!(exceeds(3, 2));
        assert!(exceeds(1, 0));
        assert!(exceeds(1, -5));
    }

    #[test]
    fn test_remaining() {
        assert_eq!(remaining(1, 3), 2);
        assert_eq!(remaining(4, 3), 0);
        assert_eq!(remaining(1, -1), 0);
    }

    #[test]
    fn test_retry_after_waits_for_blocking_record() {
        let window = WindowLength::from_secs(60);

        // quota 2, three live records: the next attempt needs the two oldest gone
        let retry = retry_after(&[2, 0, 1], 2, window, 2);
        assert_eq!(retry, Some(Duration::from_millis(60_000 - 1)));
    }

    #[test]
    fn test_retry_after_none() {
        let window = WindowLength::from_secs(60);
        assert_eq!(retry_after(&[0, 1], 2, window, 1), None);
        assert_eq!(retry_after(&[0, 1], 0, window, 1), None);
    }

    #[test]
    fn test_decision_display_and_bool() {
        assert_eq!(Decision::Admitted.to_string(), "admitted");
        assert!(bool::from(Decision::Admitted));
        assert!(!bool::from(Decision::Denied));
    }
}
