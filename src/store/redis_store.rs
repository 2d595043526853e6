//! Redis-backed store for distributed rate limiting.
//!
//! A batch becomes one `MULTI ... EXEC` pipeline, so Redis applies it as a
//! transaction: no other client's commands run between its steps.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, Pipeline, Value};
use tracing::{debug, info};

use super::{Batch, BatchReply, Reply, ScoredMember, StoreOp, WindowStore};
use crate::error::StoreError;

/// Sorted-set store on a shared Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis at `url`, e.g. `redis://127.0.0.1:6379`.
    ///
    /// Every window key is stored as `{key_prefix}{key}`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        info!(url = %url, "Connecting to Redis");

        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        info!("Redis connection established");
        Ok(Self::from_manager(manager, key_prefix))
    }

    /// Wrap an existing connection manager.
    pub fn from_manager(manager: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            manager,
            key_prefix: key_prefix.into(),
        }
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Translate a batch into one `MULTI ... EXEC` pipeline, one command per step.
fn build_pipeline(key_prefix: &str, batch: &Batch) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();

    for op in batch.ops() {
        let key = format!("{}{}", key_prefix, op.key());
        match op {
            StoreOp::RemoveByScore { min, max, .. } => {
                pipe.zrembyscore(key, *min, *max);
            }
            StoreOp::Add { member, score, .. } => {
                pipe.zadd(key, member, *score);
            }
            StoreOp::Expire { ttl, .. } => {
                pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs());
            }
            StoreOp::RangeWithScores { .. } => {
                pipe.zrange_withscores(key, 0, -1);
            }
            StoreOp::CountAbove { after, .. } => {
                let min = match after {
                    Some(after) => format!("({}", after),
                    None => "-inf".to_string(),
                };
                pipe.zcount(key, min, "+inf");
            }
            StoreOp::Delete { .. } => {
                pipe.del(key);
            }
        }
    }

    pipe
}

/// Convert the raw reply of one step according to what the step asked for.
fn decode(op: &StoreOp, value: &Value) -> Result<Reply, StoreError> {
    let reply = match op {
        StoreOp::RemoveByScore { .. } => Reply::Removed(u64::from_redis_value(value)?),
        StoreOp::Add { .. } => Reply::Added(u64::from_redis_value(value)?),
        StoreOp::Expire { .. } => Reply::ExpireSet(bool::from_redis_value(value)?),
        StoreOp::RangeWithScores { .. } => {
            let pairs: Vec<(String, f64)> = redis::from_redis_value(value)?;
            Reply::Members(
                pairs
                    .into_iter()
                    .map(|(member, score)| ScoredMember {
                        member,
                        score: score as u64,
                    })
                    .collect(),
            )
        }
        StoreOp::CountAbove { .. } => Reply::Count(u64::from_redis_value(value)?),
        StoreOp::Delete { .. } => Reply::Deleted(u64::from_redis_value(value)?),
    };
    Ok(reply)
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn execute(&self, batch: &Batch) -> Result<BatchReply, StoreError> {
        let pipe = build_pipeline(&self.key_prefix, batch);
        let mut conn = self.manager.clone();

        let values: Vec<Value> = pipe.query_async(&mut conn).await?;
        debug!(steps = batch.len(), replies = values.len(), "Executed Redis transaction");

        if values.len() != batch.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "transaction of {} commands returned {} replies",
                batch.len(),
                values.len()
            )));
        }

        let replies = batch
            .ops()
            .iter()
            .zip(values.iter())
            .map(|(op, value)| decode(op, value))
            .collect::<Result<Vec<_>, _>>()?;

        BatchReply::for_batch(batch, replies)
    }
}
