// src/store.rs
// Run records and market data behind trait seams so the worker is agnostic
// of the backing store. The in-memory implementations back tests and the
// single-process deployment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::strategy::{BacktestReport, EquityPoint, Trade, Zone};
use crate::types::{Bar, BacktestRun, RunStatus, Timeframe};

/// Persisted output of a completed run.
#[derive(Debug, Clone)]
pub struct StoredResults {
    pub trades: Vec<Trade>,
    pub zones: Vec<Zone>,
    pub metrics: Vec<(String, f64)>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Durable run records. Status transitions are monotonic; the worker never
/// moves a run backwards.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_run(&self, run_id: Uuid) -> Result<Option<BacktestRun>, StoreError>;

    async fn insert_run(&self, run: BacktestRun) -> Result<(), StoreError>;

    async fn mark_running(&self, run_id: Uuid, worker_id: &str) -> Result<(), StoreError>;

    async fn set_progress(&self, run_id: Uuid, progress: u8) -> Result<(), StoreError>;

    async fn mark_completed(&self, run_id: Uuid) -> Result<(), StoreError>;

    async fn mark_failed(&self, run_id: Uuid, error_message: &str) -> Result<(), StoreError>;

    async fn save_results(&self, run_id: Uuid, report: &BacktestReport) -> Result<(), StoreError>;
}

/// Historical bars for an instrument/timeframe pair.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Bars with `start <= timestamp < end`, ascending. An empty range is an
    /// empty vec, not an error.
    async fn load_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<Uuid, BacktestRun>,
    results: DashMap<Uuid, StoredResults>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self, run_id: Uuid) -> Option<StoredResults> {
        self.results.get(&run_id).map(|r| r.clone())
    }

    fn update<F>(&self, run_id: Uuid, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BacktestRun),
    {
        match self.runs.get_mut(&run_id) {
            Some(mut run) => {
                apply(&mut run);
                Ok(())
            }
            None => Err(StoreError::RunNotFound(run_id)),
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn get_run(&self, run_id: Uuid) -> Result<Option<BacktestRun>, StoreError> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn insert_run(&self, run: BacktestRun) -> Result<(), StoreError> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn mark_running(&self, run_id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        self.update(run_id, |run| {
            run.status = RunStatus::Running;
            run.progress = 0;
            run.worker_id = Some(worker_id.to_string());
            run.started_at = Some(Utc::now());
        })
    }

    async fn set_progress(&self, run_id: Uuid, progress: u8) -> Result<(), StoreError> {
        self.update(run_id, |run| run.progress = progress)
    }

    async fn mark_completed(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update(run_id, |run| {
            run.status = RunStatus::Completed;
            run.progress = 100;
            run.finished_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, run_id: Uuid, error_message: &str) -> Result<(), StoreError> {
        self.update(run_id, |run| {
            run.status = RunStatus::Failed;
            run.error_message = Some(error_message.to_string());
            run.finished_at = Some(Utc::now());
        })
    }

    async fn save_results(&self, run_id: Uuid, report: &BacktestReport) -> Result<(), StoreError> {
        let metrics = report
            .metrics
            .as_named_values()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect::<Vec<_>>();
        info!(
            run_id = %run_id,
            trades = report.trades.len(),
            zones = report.zones.len(),
            "saving run results"
        );
        self.results.insert(
            run_id,
            StoredResults {
                trades: report.trades.clone(),
                zones: report.zones.clone(),
                metrics,
                equity_curve: report.equity_curve.clone(),
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBarSource {
    series: DashMap<(String, Timeframe), Vec<Bar>>,
}

impl InMemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored series for the pair. Bars are sorted on insert so
    /// reads stay cheap.
    pub fn insert_series(&self, symbol: &str, timeframe: Timeframe, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.series.insert((symbol.to_string(), timeframe), bars);
    }
}

#[async_trait]
impl BarSource for InMemoryBarSource {
    async fn load_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let bars = self
            .series
            .get(&(symbol.to_string(), timeframe))
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.timestamp >= start && b.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(bars)
    }
}
