// src/queue/mod.rs
// Durable FIFO job queue: idempotency ledger, atomic claim, retry counters,
// cancellation/processing marker sets and a dead-letter store.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::types::BacktestJob;

pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;

/// Attempts allowed per run before dead-lettering.
pub const MAX_RETRIES: u32 = 3;
/// Idempotency ledger entries expire after 7 days.
pub const IDEMPOTENCY_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Retry counters expire after 24 hours.
pub const RETRY_TTL_SECS: u64 = 24 * 60 * 60;
/// Assumed average job duration, used for queue-position ETA estimates.
pub const AVG_JOB_DURATION_SECS: i64 = 300;

/// Outcome of an enqueue call. A duplicate submission references the run
/// that already owns the idempotency key and creates nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub duplicate: bool,
    pub existing_run_id: Option<Uuid>,
    /// 1-based position (the new queue length), -1 when the backend failed.
    pub queue_position: i64,
    pub estimated_start: Option<DateTime<Utc>>,
}

impl EnqueueResult {
    pub fn duplicate_of(run_id: Uuid) -> Self {
        Self {
            duplicate: true,
            existing_run_id: Some(run_id),
            queue_position: -1,
            estimated_start: None,
        }
    }

    pub fn queued(position: i64) -> Self {
        Self {
            duplicate: false,
            existing_run_id: None,
            queue_position: position,
            estimated_start: Some(
                Utc::now() + chrono::Duration::seconds(position * AVG_JOB_DURATION_SECS),
            ),
        }
    }

    /// Benign default when the backing store is unreachable.
    pub fn degraded() -> Self {
        Self {
            duplicate: false,
            existing_run_id: None,
            queue_position: -1,
            estimated_start: None,
        }
    }
}

/// A job that exhausted its retry budget, kept for manual inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: BacktestJob,
    pub error: String,
    pub moved_at: DateTime<Utc>,
}

/// The shared queue contract. Backend failures are logged and degrade to
/// benign defaults (empty / negative), never propagated; a -1 queue position
/// is therefore ambiguous between "not queued" and "lookup failed".
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Admits a job unless its idempotency key is already in the ledger.
    async fn enqueue(&self, job: BacktestJob) -> EnqueueResult;

    /// Atomically claims the oldest entry; exactly one caller ever receives
    /// a given entry. Blocks/polls up to `timeout`, `None` on expiry.
    async fn dequeue(&self, timeout: Duration) -> Option<BacktestJob>;

    /// Removes a still-queued entry if present and always records the run in
    /// the cancelled set. Idempotent. Returns whether an entry was removed.
    async fn cancel(&self, run_id: Uuid) -> bool;

    async fn is_cancelled(&self, run_id: Uuid) -> bool;

    async fn retry_count(&self, run_id: Uuid) -> u32;

    async fn increment_retry(&self, run_id: Uuid);

    async fn move_to_dead_letter(&self, job: &BacktestJob, error: &str);

    async fn dead_letter_depth(&self) -> usize;

    async fn dead_letter_entries(&self) -> Vec<DeadLetterEntry>;

    /// 0 when processing, -1 when cancelled or not found, else the 0-based
    /// position found by a linear scan.
    async fn queue_position(&self, run_id: Uuid) -> i64;

    async fn queue_depth(&self) -> usize;

    async fn mark_processing(&self, run_id: Uuid);

    async fn unmark_processing(&self, run_id: Uuid);
}
