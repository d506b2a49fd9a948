// src/queue/memory.rs
// In-process queue backend: a mutex-guarded deque with polling dequeue.
// The single lock makes every claim and ledger access atomic.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::{
    DeadLetterEntry, EnqueueResult, JobQueue, IDEMPOTENCY_TTL_SECS, RETRY_TTL_SECS,
};
use crate::types::BacktestJob;

const DEQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct LedgerEntry {
    run_id: Uuid,
    recorded_at: Instant,
}

struct RetryEntry {
    count: u32,
    touched_at: Instant,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<BacktestJob>,
    idempotency: HashMap<String, LedgerEntry>,
    retries: HashMap<Uuid, RetryEntry>,
    cancelled: HashSet<Uuid>,
    processing: HashSet<Uuid>,
    dead_letters: Vec<DeadLetterEntry>,
}

impl Default for RetryEntry {
    fn default() -> Self {
        Self {
            count: 0,
            touched_at: Instant::now(),
        }
    }
}

pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: BacktestJob) -> EnqueueResult {
        let mut inner = self.inner.lock().await;

        // Lazily expire the ledger entry before consulting it.
        if let Some(entry) = inner.idempotency.get(&job.idempotency_key) {
            if entry.recorded_at.elapsed().as_secs() >= IDEMPOTENCY_TTL_SECS {
                inner.idempotency.remove(&job.idempotency_key);
            }
        }

        if let Some(entry) = inner.idempotency.get(&job.idempotency_key) {
            info!(
                idempotency_key = %job.idempotency_key,
                existing_run_id = %entry.run_id,
                "duplicate job detected"
            );
            return EnqueueResult::duplicate_of(entry.run_id);
        }

        inner.idempotency.insert(
            job.idempotency_key.clone(),
            LedgerEntry {
                run_id: job.run_id,
                recorded_at: Instant::now(),
            },
        );
        info!(run_id = %job.run_id, depth = inner.queue.len() + 1, "enqueued job");
        inner.queue.push_back(job);
        EnqueueResult::queued(inner.queue.len() as i64)
    }

    async fn dequeue(&self, timeout: Duration) -> Option<BacktestJob> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(job) = inner.queue.pop_front() {
                    info!(run_id = %job.run_id, "dequeued job");
                    return Some(job);
                }
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            tokio::time::sleep(remaining.min(DEQUEUE_POLL_INTERVAL)).await;
        }
    }

    async fn cancel(&self, run_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.queue.len();
        inner.queue.retain(|job| job.run_id != run_id);
        let removed = inner.queue.len() < before;
        inner.cancelled.insert(run_id);
        info!(run_id = %run_id, removed, "run cancelled");
        removed
    }

    async fn is_cancelled(&self, run_id: Uuid) -> bool {
        self.inner.lock().await.cancelled.contains(&run_id)
    }

    async fn retry_count(&self, run_id: Uuid) -> u32 {
        let mut inner = self.inner.lock().await;
        match inner.retries.get(&run_id) {
            Some(entry) if entry.touched_at.elapsed().as_secs() < RETRY_TTL_SECS => entry.count,
            Some(_) => {
                inner.retries.remove(&run_id);
                0
            }
            None => 0,
        }
    }

    async fn increment_retry(&self, run_id: Uuid) {
        let mut inner = self.inner.lock().await;
        let entry = inner.retries.entry(run_id).or_default();
        if entry.touched_at.elapsed().as_secs() >= RETRY_TTL_SECS {
            entry.count = 0;
        }
        entry.count += 1;
        entry.touched_at = Instant::now();
    }

    async fn move_to_dead_letter(&self, job: &BacktestJob, error: &str) {
        let mut inner = self.inner.lock().await;
        warn!(run_id = %job.run_id, error, "moved job to dead-letter store");
        inner.dead_letters.push(DeadLetterEntry {
            job: job.clone(),
            error: error.to_string(),
            moved_at: Utc::now(),
        });
    }

    async fn dead_letter_depth(&self) -> usize {
        self.inner.lock().await.dead_letters.len()
    }

    async fn dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        self.inner.lock().await.dead_letters.clone()
    }

    async fn queue_position(&self, run_id: Uuid) -> i64 {
        let inner = self.inner.lock().await;
        if inner.processing.contains(&run_id) {
            return 0;
        }
        if inner.cancelled.contains(&run_id) {
            return -1;
        }
        inner
            .queue
            .iter()
            .position(|job| job.run_id == run_id)
            .map(|idx| idx as i64)
            .unwrap_or(-1)
    }

    async fn queue_depth(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    async fn mark_processing(&self, run_id: Uuid) {
        self.inner.lock().await.processing.insert(run_id);
    }

    async fn unmark_processing(&self, run_id: Uuid) {
        self.inner.lock().await.processing.remove(&run_id);
    }
}
