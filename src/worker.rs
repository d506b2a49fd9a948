// src/worker.rs
// Pulls jobs off the queue and drives them through the engine. Failures are
// retried up to the budget, then dead-lettered. The engine runs on a blocking
// thread; progress flows back over a channel and is throttled before it hits
// the run store.

use chrono::NaiveTime;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::StoreError;
use crate::queue::{JobQueue, MAX_RETRIES};
use crate::store::{BarSource, RunStore};
use crate::strategy::StrategyEngine;
use crate::types::{BacktestJob, StrategyParameters};

const FAILURE_BACKOFF: Duration = Duration::from_secs(5);

/// Progress updates are persisted on the first report, at 100, after a jump
/// of at least 5 points or when 10 seconds have passed since the last write.
pub struct ProgressThrottle {
    last_pct: Option<u8>,
    last_at: Instant,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self {
            last_pct: None,
            last_at: Instant::now(),
        }
    }

    pub fn should_report(&mut self, pct: u8) -> bool {
        let report = match self.last_pct {
            None => true,
            Some(last) => {
                pct == 100
                    || pct.saturating_sub(last) >= 5
                    || self.last_at.elapsed() >= Duration::from_secs(10)
            }
        };
        if report {
            self.last_pct = Some(pct);
            self.last_at = Instant::now();
        }
        report
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn RunStore>,
    bars: Arc<dyn BarSource>,
    dequeue_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: String,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn RunStore>,
        bars: Arc<dyn BarSource>,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            bars,
            dequeue_timeout,
        }
    }

    /// The worker loop. Infrastructure errors back off and keep going; only
    /// an external shutdown (task abort) stops it.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "worker started");
        loop {
            if let Err(e) = self.poll_once().await {
                error!(worker_id = %self.id, error = %e, "worker loop error");
                tokio::time::sleep(FAILURE_BACKOFF).await;
            }
        }
    }

    /// Claims at most one job and processes it to completion. Returns whether
    /// a job was claimed.
    pub async fn poll_once(&self) -> Result<bool, StoreError> {
        match self.queue.dequeue(self.dequeue_timeout).await {
            Some(job) => {
                self.process_job(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process_job(&self, job: BacktestJob) -> Result<(), StoreError> {
        // Read the counter before the attempt: counts 0..MAX_RETRIES mean the
        // fourth failure is the one that dead-letters.
        let retry_count = self.queue.retry_count(job.run_id).await;

        if self.store.get_run(job.run_id).await?.is_none() {
            warn!(run_id = %job.run_id, "dropping job with no run record");
            return Ok(());
        }

        info!(
            worker_id = %self.id,
            run_id = %job.run_id,
            symbol = %job.symbol,
            timeframe = %job.timeframe,
            retry_count,
            "processing job"
        );

        self.queue.mark_processing(job.run_id).await;
        let outcome = self.run_attempt(&job).await;
        self.queue.unmark_processing(job.run_id).await;

        match outcome {
            Ok(()) => {
                info!(worker_id = %self.id, run_id = %job.run_id, "run completed");
            }
            Err(message) => {
                if retry_count >= MAX_RETRIES {
                    error!(
                        run_id = %job.run_id,
                        retry_count,
                        error = %message,
                        "retry budget exhausted, dead-lettering run"
                    );
                    if let Err(e) = self.store.mark_failed(job.run_id, &message).await {
                        error!(run_id = %job.run_id, error = %e, "error marking run failed");
                    }
                    self.queue.move_to_dead_letter(&job, &message).await;
                } else {
                    self.queue.increment_retry(job.run_id).await;
                    warn!(
                        run_id = %job.run_id,
                        retry_count = retry_count + 1,
                        error = %message,
                        "run attempt failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// One execution attempt. Any error is terminal for the attempt and comes
    /// back as a message for the retry bookkeeping.
    async fn run_attempt(&self, job: &BacktestJob) -> Result<(), String> {
        self.store
            .mark_running(job.run_id, &self.id)
            .await
            .map_err(|e| e.to_string())?;

        let params: StrategyParameters = serde_json::from_value(job.parameters.clone())
            .map_err(|e| format!("invalid strategy parameters: {}", e))?;

        let start = job.start_date.and_time(NaiveTime::MIN).and_utc();
        let end = job
            .end_date
            .succ_opt()
            .ok_or_else(|| "end date out of range".to_string())?
            .and_time(NaiveTime::MIN)
            .and_utc();

        let bars = self
            .bars
            .load_bars(&job.symbol, job.timeframe, start, end)
            .await
            .map_err(|e| e.to_string())?;

        let engine = StrategyEngine::new(params, job.timeframe, job.initial_capital);
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let handle = tokio::task::spawn_blocking(move || {
            engine.run(&bars, &mut |pct| {
                let _ = tx.send(pct);
            })
        });

        let mut throttle = ProgressThrottle::new();
        while let Some(pct) = rx.recv().await {
            if throttle.should_report(pct) {
                // Progress writes are best-effort.
                if let Err(e) = self.store.set_progress(job.run_id, pct).await {
                    warn!(run_id = %job.run_id, error = %e, "error persisting progress");
                }
            }
        }

        let report = handle
            .await
            .map_err(|e| format!("engine task panicked: {}", e))?
            .map_err(|e| e.to_string())?;

        self.store
            .save_results(job.run_id, &report)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .mark_completed(job.run_id)
            .await
            .map_err(|e| e.to_string())?;

        info!(
            run_id = %job.run_id,
            trades = report.trades.len(),
            total_pnl = report.metrics.total_pnl,
            "results persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_reports_first_and_large_jumps() {
        let mut t = ProgressThrottle::new();
        assert!(t.should_report(0));
        assert!(!t.should_report(2));
        assert!(!t.should_report(4));
        assert!(t.should_report(5));
        assert!(!t.should_report(8));
        assert!(t.should_report(10));
    }

    #[test]
    fn throttle_always_reports_completion() {
        let mut t = ProgressThrottle::new();
        assert!(t.should_report(97));
        assert!(t.should_report(100));
    }
}
