//! In-process sorted-set store.
//!
//! Every batch runs under one lock, which gives the same all-or-nothing,
//! no-interleaving guarantee a `MULTI/EXEC` transaction gives on Redis. Keys
//! past their TTL, measured on the store's [`Clock`], are swept at the start of
//! every batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{Batch, BatchReply, Reply, ScoredMember, StoreOp, WindowStore};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

/// One sorted set and its expiry deadline.
#[derive(Debug, Default)]
struct SortedSet {
    /// member -> score
    members: HashMap<String, u64>,
    /// Absolute expiry in clock milliseconds
    expires_at: Option<u64>,
}

impl SortedSet {
    fn sorted(&self) -> Vec<ScoredMember> {
        let mut members: Vec<ScoredMember> = self
            .members
            .iter()
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        members.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
        members
    }

    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Sorted-set store held in process memory.
pub struct MemoryStore<C: Clock = SystemClock> {
    sets: Mutex<HashMap<String, SortedSet>>,
    clock: C,
    available: AtomicBool,
}

impl MemoryStore<SystemClock> {
    /// Create a store that expires keys against the wall clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    /// Create a store that expires keys against `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Make every following batch fail (`false`) or succeed again (`true`).
    ///
    /// A failed batch leaves the stored data untouched.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of members stored under `key`, or 0 if it has expired.
    pub fn card(&self, key: &str) -> usize {
        let now = self.clock.now_millis();
        let mut sets = self.sets.lock();
        Self::purge_expired(&mut sets, key, now);
        sets.get(key).map_or(0, |set| set.members.len())
    }

    /// Members of `key` with scores, lowest first.
    pub fn members(&self, key: &str) -> Vec<ScoredMember> {
        let now = self.clock.now_millis();
        let mut sets = self.sets.lock();
        Self::purge_expired(&mut sets, key, now);
        sets.get(key).map(SortedSet::sorted).unwrap_or_default()
    }

    /// Number of keys that have not expired.
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        let mut sets = self.sets.lock();
        Self::sweep_expired(&mut sets, now);
        sets.len()
    }

    /// Drop every key whose TTL has run out, touched or not.
    fn sweep_expired(sets: &mut HashMap<String, SortedSet>, now: u64) {
        let before = sets.len();
        sets.retain(|_, set| !set.is_expired(now));
        if sets.len() < before {
            trace!(expired = before - sets.len(), "Expired keys swept");
        }
    }

    fn purge_expired(sets: &mut HashMap<String, SortedSet>, key: &str, now: u64) {
        let expired = sets.get(key).is_some_and(|set| set.is_expired(now));
        if expired {
            trace!(key = %key, "Expiring key");
            sets.remove(key);
        }
    }

    fn apply(sets: &mut HashMap<String, SortedSet>, op: &StoreOp, now: u64) -> Reply {
        match op {
            StoreOp::RemoveByScore { key, min, max } => {
                let Some(set) = sets.get_mut(key) else {
                    return Reply::Removed(0);
                };
                let before = set.members.len();
                set.members.retain(|_, score| *score < *min || *score > *max);
                let removed = (before - set.members.len()) as u64;
                if set.members.is_empty() {
                    sets.remove(key);
                }
                Reply::Removed(removed)
            }
            StoreOp::Add { key, member, score } => {
                let set = sets.entry(key.clone()).or_default();
                let added = set.members.insert(member.clone(), *score).is_none();
                Reply::Added(u64::from(added))
            }
            StoreOp::Expire { key, ttl } => match sets.get_mut(key) {
                Some(set) => {
                    set.expires_at = Some(now.saturating_add(ttl.as_millis() as u64));
                    Reply::ExpireSet(true)
                }
                None => Reply::ExpireSet(false),
            },
            StoreOp::RangeWithScores { key } => {
                Reply::Members(sets.get(key).map(SortedSet::sorted).unwrap_or_default())
            }
            StoreOp::CountAbove { key, after } => {
                let count = sets.get(key).map_or(0, |set| {
                    set.members
                        .values()
                        .filter(|score| match after {
                            Some(after) => **score > *after,
                            None => true,
                        })
                        .count()
                });
                Reply::Count(count as u64)
            }
            StoreOp::Delete { key } => Reply::Deleted(u64::from(sets.remove(key).is_some())),
        }
    }
}

#[async_trait]
impl<C: Clock> WindowStore for MemoryStore<C> {
    async fn execute(&self, batch: &Batch) -> Result<BatchReply, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store is marked unavailable".to_string(),
            ));
        }

        let now = self.clock.now_millis();
        let mut sets = self.sets.lock();
        Self::sweep_expired(&mut sets, now);
        let replies = batch
            .ops()
            .iter()
            .map(|op| Self::apply(&mut sets, op, now))
            .collect();

        BatchReply::for_batch(batch, replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_add_and_range() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        let mut batch = Batch::new();
        batch.add("k", "b", 20);
        batch.add("k", "a", 10);
        let read = batch.range_with_scores("k");

        let reply = assert_ok!(store.execute(&batch).await);
        let members = reply.members(read).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member, "a");
        assert_eq!(members[1].score, 20);
    }

    #[tokio::test]
    async fn test_re_adding_member_rescored_not_duplicated() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        let mut batch = Batch::new();
        let first = batch.add("k", "same", 1);
        let second = batch.add("k", "same", 2);

        let reply = store.execute(&batch).await.unwrap();
        assert_eq!(reply.get(first), Some(&Reply::Added(1)));
        assert_eq!(reply.get(second), Some(&Reply::Added(0)));
        assert_eq!(store.card("k"), 1);
        assert_eq!(store.members("k")[0].score, 2);
    }

    #[tokio::test]
    async fn test_remove_by_score_is_inclusive() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        let mut batch = Batch::new();
        for score in [5, 10, 15] {
            batch.add("k", score.to_string(), score);
        }
        store.execute(&batch).await.unwrap();

        let mut batch = Batch::new();
        let removed = batch.remove_by_score("k", 0, 10);
        let reply = store.execute(&batch).await.unwrap();

        assert_eq!(reply.get(removed), Some(&Reply::Removed(2)));
        assert_eq!(store.members("k")[0].score, 15);
    }

    #[tokio::test]
    async fn test_count_above() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        let mut batch = Batch::new();
        for score in [1, 2, 3] {
            batch.add("k", score.to_string(), score);
        }
        let all = batch.count_above("k", None);
        let above = batch.count_above("k", Some(2));

        let reply = store.execute(&batch).await.unwrap();
        assert_eq!(reply.count(all).unwrap(), 3);
        assert_eq!(reply.count(above).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_expires_after_ttl() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::with_clock(clock.clone());
        let mut batch = Batch::new();
        batch.add("k", "a", 0);
        let expire = batch.expire("k", Duration::from_secs(60));

        let reply = store.execute(&batch).await.unwrap();
        assert_eq!(reply.get(expire), Some(&Reply::ExpireSet(true)));

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(store.card("k"), 1);

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.card("k"), 0);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_untouched_expired_keys_are_reclaimed() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::with_clock(clock.clone());

        let mut batch = Batch::new();
        for i in 0..1000 {
            let key = format!("idle:{}", i);
            batch.add(&key, "a", 0);
            batch.expire(&key, Duration::from_secs(60));
        }
        store.execute(&batch).await.unwrap();
        assert_eq!(store.sets.lock().len(), 1000);

        clock.advance(Duration::from_secs(3600));
        let mut batch = Batch::new();
        batch.add("active", "a", 3_600_000);
        store.execute(&batch).await.unwrap();

        assert_eq!(store.sets.lock().len(), 1);
        assert!(store.sets.lock().contains_key("active"));
    }

    #[tokio::test]
    async fn test_expire_on_missing_key() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        let mut batch = Batch::new();
        let expire = batch.expire("missing", Duration::from_secs(1));

        let reply = store.execute(&batch).await.unwrap();
        assert_eq!(reply.get(expire), Some(&Reply::ExpireSet(false)));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        let mut batch = Batch::new();
        batch.add("k", "a", 1);
        store.execute(&batch).await.unwrap();

        let mut batch = Batch::new();
        let deleted = batch.delete("k");
        let reply = store.execute(&batch).await.unwrap();
        assert_eq!(reply.deleted(deleted).unwrap(), 1);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_applies_nothing() {
        let store = MemoryStore::with_clock(ManualClock::new(0));
        store.set_available(false);

        let mut batch = Batch::new();
        batch.add("k", "a", 1);
        let result = store.execute(&batch).await;

        assert!(matches!(assert_err!(result), StoreError::Unavailable(_)));
        assert_eq!(store.card("k"), 0);

        store.set_available(true);
        assert_ok!(store.execute(&batch).await);
        assert_eq!(store.card("k"), 1);
    }
}
