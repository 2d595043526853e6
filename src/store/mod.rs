//! Shared sorted-set store abstraction.
//!
//! The limiter never talks to a store one command at a time. It builds a
//! [`Batch`] of sorted-set operations and hands the whole thing to a
//! [`WindowStore`], which must apply it atomically: every step or none, with no
//! other batch on the same key interleaving.
//!
//! Each step added to a batch returns a [`StepId`]. Replies are looked up by
//! that id, so reordering or inserting steps cannot shift which reply the
//! caller reads.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// A sorted-set member together with its score (a millisecond timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: u64,
}

/// One sorted-set operation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Remove members whose score lies in `min..=max`.
    RemoveByScore { key: String, min: u64, max: u64 },
    /// Insert `member` with `score`, or update the score of an existing member.
    Add { key: String, member: String, score: u64 },
    /// Set the time-to-live of the whole key.
    Expire { key: String, ttl: Duration },
    /// Read every member with its score, lowest score first.
    RangeWithScores { key: String },
    /// Count members with a score strictly above `after`, or all members when `None`.
    CountAbove { key: String, after: Option<u64> },
    /// Delete the key outright.
    Delete { key: String },
}

impl StoreOp {
    /// The key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            StoreOp::RemoveByScore { key, .. }
            | StoreOp::Add { key, .. }
            | StoreOp::Expire { key, .. }
            | StoreOp::RangeWithScores { key }
            | StoreOp::CountAbove { key, .. }
            | StoreOp::Delete { key } => key,
        }
    }
}

/// Label of a step within a [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

/// An ordered list of operations to apply as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<StoreOp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove members of `key` with a score in `min..=max`.
    pub fn remove_by_score(&mut self, key: &str, min: u64, max: u64) -> StepId {
        self.push(StoreOp::RemoveByScore {
            key: key.to_string(),
            min,
            max,
        })
    }

    /// Insert `member` into `key` with `score`.
    pub fn add(&mut self, key: &str, member: impl Into<String>, score: u64) -> StepId {
        self.push(StoreOp::Add {
            key: key.to_string(),
            member: member.into(),
            score,
        })
    }

    /// Set the time-to-live of `key`.
    pub fn expire(&mut self, key: &str, ttl: Duration) -> StepId {
        self.push(StoreOp::Expire {
            key: key.to_string(),
            ttl,
        })
    }

    /// Read all members of `key` with their scores.
    pub fn range_with_scores(&mut self, key: &str) -> StepId {
        self.push(StoreOp::RangeWithScores {
            key: key.to_string(),
        })
    }

    /// Count members of `key` scored strictly above `after`.
    pub fn count_above(&mut self, key: &str, after: Option<u64>) -> StepId {
        self.push(StoreOp::CountAbove {
            key: key.to_string(),
            after,
        })
    }

    /// Delete `key`.
    pub fn delete(&mut self, key: &str) -> StepId {
        self.push(StoreOp::Delete {
            key: key.to_string(),
        })
    }

    /// The operations in submission order.
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push(&mut self, op: StoreOp) -> StepId {
        self.ops.push(op);
        StepId(self.ops.len() - 1)
    }
}

/// The outcome of one batch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Number of members removed
    Removed(u64),
    /// Number of members newly added (0 when an existing member was rescored)
    Added(u64),
    /// Whether a TTL was set
    ExpireSet(bool),
    /// Members with scores, lowest score first
    Members(Vec<ScoredMember>),
    /// Number of members counted
    Count(u64),
    /// Number of keys deleted
    Deleted(u64),
}

/// Replies of a committed batch, addressed by [`StepId`].
#[derive(Debug, Clone)]
pub struct BatchReply {
    replies: Vec<Reply>,
}

impl BatchReply {
    /// Pair the replies of a store with the batch that produced them.
    ///
    /// Fails if the store returned a different number of replies than the batch
    /// has steps.
    pub fn for_batch(batch: &Batch, replies: Vec<Reply>) -> Result<Self, StoreError> {
        if replies.len() != batch.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "batch of {} steps produced {} replies",
                batch.len(),
                replies.len()
            )));
        }
        Ok(Self { replies })
    }

    /// The raw reply of a step.
    pub fn get(&self, step: StepId) -> Option<&Reply> {
        self.replies.get(step.0)
    }

    /// Members read by a [`Batch::range_with_scores`] step.
    pub fn members(&self, step: StepId) -> Result<&[ScoredMember], StoreError> {
        match self.get(step) {
            Some(Reply::Members(members)) => Ok(members),
            other => Err(mismatch("members", step, other)),
        }
    }

    /// Count produced by a [`Batch::count_above`] step.
    pub fn count(&self, step: StepId) -> Result<u64, StoreError> {
        match self.get(step) {
            Some(Reply::Count(n)) => Ok(*n),
            other => Err(mismatch("count", step, other)),
        }
    }

    /// Number of keys removed by a [`Batch::delete`] step.
    pub fn deleted(&self, step: StepId) -> Result<u64, StoreError> {
        match self.get(step) {
            Some(Reply::Deleted(n)) => Ok(*n),
            other => Err(mismatch("deleted", step, other)),
        }
    }
}

fn mismatch(expected: &str, step: StepId, got: Option<&Reply>) -> StoreError {
    StoreError::UnexpectedReply(format!(
        "step {} expected {} reply, got {:?}",
        step.0, expected, got
    ))
}

/// A shared store that can apply a [`Batch`] atomically.
///
/// Implementations must apply all steps or none and must not let another batch
/// touching the same key observe a partially applied one.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Apply `batch` and return one reply per step.
    async fn execute(&self, batch: &Batch) -> Result<BatchReply, StoreError>;
}

#[async_trait]
impl<S: WindowStore + ?Sized> WindowStore for std::sync::Arc<S> {
    async fn execute(&self, batch: &Batch) -> Result<BatchReply, StoreError> {
        (**self).execute(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_ids_follow_submission_order() {
        let mut batch = Batch::new();
        let remove = batch.remove_by_score("k", 0, 10);
        let read = batch.range_with_scores("k");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[0].key(), "k");

        let reply = BatchReply::for_batch(
            &batch,
            vec![Reply::Removed(3), Reply::Members(Vec::new())],
        )
        .unwrap();

        assert_eq!(reply.get(remove), Some(&Reply::Removed(3)));
        assert!(reply.members(read).unwrap().is_empty());
    }

    #[test]
    fn test_reply_kind_mismatch_is_an_error() {
        let mut batch = Batch::new();
        let read = batch.range_with_scores("k");
        let reply = BatchReply::for_batch(&batch, vec![Reply::Count(1)]).unwrap();

        assert!(matches!(
            reply.members(read),
            Err(StoreError::UnexpectedReply(_))
        ));
    }

    #[test]
    fn test_reply_length_mismatch_is_an_error() {
        let mut batch = Batch::new();
        batch.delete("k");
        batch.delete("j");

        let result = BatchReply::for_batch(&batch, vec![Reply::Deleted(1)]);
        assert!(matches!(result, Err(StoreError::UnexpectedReply(_))));
    }
}
