// src/queue/redis.rs
// Redis-backed queue. Key layout mirrors the durable deployment:
// a list for the FIFO queue, string keys with TTLs for the idempotency
// ledger and retry counters, sets for the cancellation/processing markers
// and a list for dead letters. Jobs travel as JSON.
//
// Every operation degrades to a benign default on a backend failure; the
// error is logged, never propagated.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::queue::{
    DeadLetterEntry, EnqueueResult, JobQueue, IDEMPOTENCY_TTL_SECS, RETRY_TTL_SECS,
};
use crate::types::BacktestJob;

const QUEUE_KEY: &str = "backtests:queue";
const DLQ_KEY: &str = "backtests:dlq";
const RETRY_PREFIX: &str = "backtests:retry:";
const IDEMPOTENCY_PREFIX: &str = "backtests:idempotency:";
const PROCESSING_KEY: &str = "backtests:processing";
const CANCELLED_KEY: &str = "backtests:cancelled";

const DEQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RedisJobQueue {
    conn: MultiplexedConnection,
}

impl RedisJobQueue {
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    fn retry_key(run_id: Uuid) -> String {
        format!("{}{}", RETRY_PREFIX, run_id)
    }

    fn idempotency_key(key: &str) -> String {
        format!("{}{}", IDEMPOTENCY_PREFIX, key)
    }

    /// Pops the oldest serialized entry, if any. The RPOP itself is the
    /// atomic claim: Redis hands each element to exactly one caller.
    async fn try_claim(&self) -> Option<BacktestJob> {
        let mut conn = self.conn.clone();
        let popped: Option<String> = match conn.rpop(QUEUE_KEY, None).await {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "error dequeuing from redis");
                return None;
            }
        };
        let payload = popped?;
        match serde_json::from_str::<BacktestJob>(&payload) {
            Ok(job) => Some(job),
            Err(e) => {
                error!(error = %e, "dropping malformed queue entry");
                None
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: BacktestJob) -> EnqueueResult {
        let mut conn = self.conn.clone();
        let ledger_key = Self::idempotency_key(&job.idempotency_key);

        let existing: Option<String> = match conn.get(&ledger_key).await {
            Ok(value) => value,
            Err(e) => {
                error!(run_id = %job.run_id, error = %e, "error checking idempotency ledger");
                return EnqueueResult::degraded();
            }
        };
        if let Some(raw) = existing {
            if let Ok(existing_run_id) = raw.parse::<Uuid>() {
                info!(
                    idempotency_key = %job.idempotency_key,
                    existing_run_id = %existing_run_id,
                    "duplicate job detected"
                );
                return EnqueueResult::duplicate_of(existing_run_id);
            }
        }

        let payload = match serde_json::to_string(&job) {
            Ok(json) => json,
            Err(e) => {
                error!(run_id = %job.run_id, error = %e, "error serializing job");
                return EnqueueResult::degraded();
            }
        };

        if let Err(e) = conn.lpush::<_, _, ()>(QUEUE_KEY, payload).await {
            error!(run_id = %job.run_id, error = %e, "error enqueuing job");
            return EnqueueResult::degraded();
        }
        if let Err(e) = conn
            .set_ex::<_, _, ()>(
                &ledger_key,
                job.run_id.to_string(),
                IDEMPOTENCY_TTL_SECS as u64,
            )
            .await
        {
            error!(run_id = %job.run_id, error = %e, "error recording idempotency ledger entry");
        }

        let depth: i64 = conn.llen(QUEUE_KEY).await.unwrap_or(-1);
        info!(run_id = %job.run_id, depth, "enqueued job");
        if depth < 0 {
            return EnqueueResult::degraded();
        }
        EnqueueResult::queued(depth)
    }

    async fn dequeue(&self, timeout: Duration) -> Option<BacktestJob> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_claim().await {
                info!(run_id = %job.run_id, "dequeued job");
                return Some(job);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            tokio::time::sleep(remaining.min(DEQUEUE_POLL_INTERVAL)).await;
        }
    }

    async fn cancel(&self, run_id: Uuid) -> bool {
        let mut conn = self.conn.clone();

        // Find and remove the serialized entry for this run, if still queued.
        let mut removed = false;
        let entries: Vec<String> = conn.lrange(QUEUE_KEY, 0, -1).await.unwrap_or_default();
        for raw in entries {
            let matches = serde_json::from_str::<BacktestJob>(&raw)
                .map(|job| job.run_id == run_id)
                .unwrap_or(false);
            if matches {
                match conn.lrem::<_, _, i64>(QUEUE_KEY, 1, raw).await {
                    Ok(count) => removed = count > 0,
                    Err(e) => error!(run_id = %run_id, error = %e, "error removing queued entry"),
                }
                break;
            }
        }

        if let Err(e) = conn
            .sadd::<_, _, ()>(CANCELLED_KEY, run_id.to_string())
            .await
        {
            error!(run_id = %run_id, error = %e, "error recording cancellation");
        }
        info!(run_id = %run_id, removed, "run cancelled");
        removed
    }

    async fn is_cancelled(&self, run_id: Uuid) -> bool {
        let mut conn = self.conn.clone();
        conn.sismember(CANCELLED_KEY, run_id.to_string())
            .await
            .unwrap_or_else(|e| {
                error!(run_id = %run_id, error = %e, "error checking cancelled set");
                false
            })
    }

    async fn retry_count(&self, run_id: Uuid) -> u32 {
        let mut conn = self.conn.clone();
        let count: Option<u32> = conn.get(Self::retry_key(run_id)).await.unwrap_or_else(|e| {
            error!(run_id = %run_id, error = %e, "error reading retry counter");
            None
        });
        count.unwrap_or(0)
    }

    async fn increment_retry(&self, run_id: Uuid) {
        let mut conn = self.conn.clone();
        let key = Self::retry_key(run_id);
        if let Err(e) = conn.incr::<_, _, ()>(&key, 1).await {
            error!(run_id = %run_id, error = %e, "error incrementing retry counter");
            return;
        }
        if let Err(e) = conn.expire::<_, ()>(&key, RETRY_TTL_SECS as i64).await {
            error!(run_id = %run_id, error = %e, "error setting retry counter ttl");
        }
    }

    async fn move_to_dead_letter(&self, job: &BacktestJob, error_message: &str) {
        let mut conn = self.conn.clone();
        let entry = DeadLetterEntry {
            job: job.clone(),
            error: error_message.to_string(),
            moved_at: Utc::now(),
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                error!(run_id = %job.run_id, error = %e, "error serializing dead-letter entry");
                return;
            }
        };
        if let Err(e) = conn.lpush::<_, _, ()>(DLQ_KEY, payload).await {
            error!(run_id = %job.run_id, error = %e, "error appending dead-letter entry");
            return;
        }
        warn!(run_id = %job.run_id, error = error_message, "moved job to dead-letter store");
    }

    async fn dead_letter_depth(&self) -> usize {
        let mut conn = self.conn.clone();
        let depth: i64 = conn.llen(DLQ_KEY).await.unwrap_or_else(|e| {
            error!(error = %e, "error reading dead-letter depth");
            0
        });
        depth.max(0) as usize
    }

    async fn dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(DLQ_KEY, 0, -1).await.unwrap_or_else(|e| {
            error!(error = %e, "error listing dead-letter entries");
            Vec::new()
        });
        raw.iter()
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect()
    }

    async fn queue_position(&self, run_id: Uuid) -> i64 {
        let mut conn = self.conn.clone();

        match conn
            .sismember::<_, _, bool>(PROCESSING_KEY, run_id.to_string())
            .await
        {
            Ok(true) => return 0,
            Ok(false) => {}
            Err(e) => {
                error!(run_id = %run_id, error = %e, "error checking processing set");
                return -1;
            }
        }
        match conn
            .sismember::<_, _, bool>(CANCELLED_KEY, run_id.to_string())
            .await
        {
            Ok(true) => return -1,
            Ok(false) => {}
            Err(e) => {
                error!(run_id = %run_id, error = %e, "error checking cancelled set");
                return -1;
            }
        }

        // LPUSH puts new entries at the head, so the next entry to be
        // claimed is the tail. Scan from the tail to count jobs ahead.
        let entries: Vec<String> = match conn.lrange(QUEUE_KEY, 0, -1).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "error scanning queue");
                return -1;
            }
        };
        for (ahead, raw) in entries.iter().rev().enumerate() {
            let matches = serde_json::from_str::<BacktestJob>(raw)
                .map(|job| job.run_id == run_id)
                .unwrap_or(false);
            if matches {
                return ahead as i64;
            }
        }
        -1
    }

    async fn queue_depth(&self) -> usize {
        let mut conn = self.conn.clone();
        let depth: i64 = conn.llen(QUEUE_KEY).await.unwrap_or_else(|e| {
            error!(error = %e, "error reading queue depth");
            0
        });
        depth.max(0) as usize
    }

    async fn mark_processing(&self, run_id: Uuid) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .sadd::<_, _, ()>(PROCESSING_KEY, run_id.to_string())
            .await
        {
            error!(run_id = %run_id, error = %e, "error marking run as processing");
        }
    }

    async fn unmark_processing(&self, run_id: Uuid) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .srem::<_, _, ()>(PROCESSING_KEY, run_id.to_string())
            .await
        {
            error!(run_id = %run_id, error = %e, "error unmarking run as processing");
        }
    }
}
