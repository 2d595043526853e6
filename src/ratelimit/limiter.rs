//! Sliding-window rate limiter over a shared sorted-set store.

use tracing::{debug, info, trace, warn};

use super::rules::QuotaPolicy;
use super::window::{self, Decision, RecordIdentity, WindowLength, WindowStatus};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::store::{Batch, BatchReply, WindowStore};

/// Decides whether an attempt on a key fits its quota over a trailing window.
///
/// Each key is a sorted set of attempt timestamps in the shared store. A check
/// prunes stale timestamps, records the current attempt, refreshes the key's
/// TTL and reads back the live set, all in one atomic batch. The limiter keeps
/// no state of its own, so any number of instances may share one store.
pub struct SlidingWindowLimiter<S, C = SystemClock> {
    store: S,
    clock: C,
    window: WindowLength,
    identity: RecordIdentity,
}

impl<S: WindowStore> SlidingWindowLimiter<S, SystemClock> {
    /// Create a limiter timestamping attempts with the wall clock.
    pub fn new(store: S, window: WindowLength) -> Self {
        Self::with_clock(store, window, SystemClock)
    }
}

impl<S: WindowStore, C: Clock> SlidingWindowLimiter<S, C> {
    /// Create a limiter with an explicit clock.
    pub fn with_clock(store: S, window: WindowLength, clock: C) -> Self {
        Self {
            store,
            clock,
            window,
            identity: RecordIdentity::default(),
        }
    }

    /// Choose how record members are named.
    pub fn record_identity(mut self, identity: RecordIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn window(&self) -> WindowLength {
        self.window
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record an attempt on `key` and decide it against `quota`.
    ///
    /// Denied attempts are recorded too and count against later ones.
    pub async fn check_and_record(&self, key: &str, quota: i64) -> Result<Decision> {
        Ok(self.evaluate(key, quota).await?.decision)
    }

    /// Like [`check_and_record`](Self::check_and_record), with the live count
    /// and retry hint.
    pub async fn evaluate(&self, key: &str, quota: i64) -> Result<WindowStatus> {
        let now = self.clock.now_millis();
        let cutoff = self.window.cutoff(now);

        trace!(
            key = %key,
            quota = quota,
            now = now,
            cutoff = ?cutoff,
            "Checking rate limit"
        );

        let mut batch = Batch::new();
        if let Some(cutoff) = cutoff {
            batch.remove_by_score(key, 0, cutoff);
        }
        batch.add(key, self.identity.member_for(now), now);
        batch.expire(key, self.window.as_duration());
        let live = batch.range_with_scores(key);

        let reply = self.submit(key, &batch).await?;
        let scores: Vec<u64> = reply
            .members(live)?
            .iter()
            .map(|m| m.score)
            .collect();

        let count = scores.len() as u64;
        let decision = if window::exceeds(count, quota) {
            debug!(
                key = %key,
                count = count,
                quota = quota,
                "Rate limit exceeded"
            );
            Decision::Denied
        } else {
            Decision::Admitted
        };

        let retry_after = match decision {
            Decision::Admitted => None,
            Decision::Denied => window::retry_after(&scores, quota, self.window, now),
        };

        Ok(WindowStatus {
            key: key.to_string(),
            decision,
            count,
            quota,
            remaining: window::remaining(count, quota),
            retry_after,
        })
    }

    /// Resolve the quota for `key` from `policy`, then evaluate.
    pub async fn check_with_policy(&self, key: &str, policy: &QuotaPolicy) -> Result<WindowStatus> {
        let quota = policy.quota_for(key);
        self.evaluate(key, quota).await
    }

    /// Number of live records on `key`, without recording an attempt.
    pub async fn peek(&self, key: &str) -> Result<u64> {
        let cutoff = self.window.cutoff(self.clock.now_millis());

        let mut batch = Batch::new();
        let live = batch.count_above(key, cutoff);

        let reply = self.submit(key, &batch).await?;
        Ok(reply.count(live)?)
    }

    /// Drop every record on `key`.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let mut batch = Batch::new();
        let deleted = batch.delete(key);

        let reply = self.submit(key, &batch).await?;
        let existed = reply.deleted(deleted)? > 0;
        info!(key = %key, existed = existed, "Rate limit reset");
        Ok(())
    }

    async fn submit(
        &self,
        key: &str,
        batch: &Batch,
    ) -> std::result::Result<BatchReply, StoreError> {
        self.store.execute(batch).await.map_err(|e| {
            warn!(key = %key, error = %e, "Rate limit store batch failed");
            e
        })
    }
}
