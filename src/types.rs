// src/types.rs
// Core wire and record types shared by the queue, the worker and the engine.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Bar timeframes supported by the engine. The nominal bar duration is used
/// to express holding time in bar units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn bar_duration(&self) -> Duration {
        match self {
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

/// A single OHLCV bar. Bars are ordered by timestamp ascending; gaps are
/// tolerated, not corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Strategy parameters as submitted by the gateway. Range validation happens
/// before enqueue; the engine takes these at face value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParameters {
    pub zone_lookback_bars: usize,
    pub min_zone_touches: usize,
    pub zone_width_atr_multiple: f64,
    pub max_zone_age_bars: usize,
    pub stoploss_atr_multiple: f64,
    pub takeprofit_r_multiple: f64,
    pub risk_per_trade_pct: f64,
    pub max_concurrent_trades: usize,
    pub limit_order_offset_ticks: u32,
    pub include_asian_session: bool,
    pub include_london_session: bool,
    pub include_newyork_session: bool,
}

/// A backtest job as it travels on the queue. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestJob {
    pub run_id: Uuid,
    pub strategy_id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub parameters: serde_json::Value,
    pub user_id: Uuid,
    pub initial_capital: f64,
    pub idempotency_key: String,
}

impl BacktestJob {
    /// Builds a job and derives its idempotency key from the semantic inputs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        strategy_id: Uuid,
        symbol: String,
        timeframe: Timeframe,
        start_date: NaiveDate,
        end_date: NaiveDate,
        parameters: serde_json::Value,
        user_id: Uuid,
        initial_capital: f64,
    ) -> Self {
        let idempotency_key = compute_idempotency_key(
            strategy_id,
            &symbol,
            timeframe,
            start_date,
            end_date,
            &parameters,
        );
        Self {
            run_id,
            strategy_id,
            symbol,
            timeframe,
            start_date,
            end_date,
            parameters,
            user_id,
            initial_capital,
            idempotency_key,
        }
    }
}

/// Deterministic fingerprint of a job's semantic inputs, as lowercase hex
/// SHA-256. Two submissions with the same strategy, instrument, range and
/// parameters hash to the same key.
pub fn compute_idempotency_key(
    strategy_id: Uuid,
    symbol: &str,
    timeframe: Timeframe,
    start_date: NaiveDate,
    end_date: NaiveDate,
    parameters: &serde_json::Value,
) -> String {
    // serde_json maps are sorted by key, so serialization is canonical.
    let params = parameters.to_string();
    let mut hasher = Sha256::new();
    hasher.update(strategy_id.as_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update(timeframe.as_str().as_bytes());
    hasher.update(start_date.to_string().as_bytes());
    hasher.update(end_date.to_string().as_bytes());
    hasher.update(params.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Run status machine: Queued -> Running -> {Completed, Failed, Cancelled}.
/// Monotonic, no back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// The durable run record the gateway creates at submission time and the
/// worker updates while executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub parameters: serde_json::Value,
    pub initial_capital: f64,
    pub status: RunStatus,
    pub progress: u8,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BacktestRun {
    pub fn from_job(job: &BacktestJob) -> Self {
        Self {
            id: job.run_id,
            strategy_id: job.strategy_id,
            user_id: job.user_id,
            symbol: job.symbol.clone(),
            timeframe: job.timeframe,
            start_date: job.start_date,
            end_date: job.end_date,
            parameters: job.parameters.clone(),
            initial_capital: job.initial_capital,
            status: RunStatus::Queued,
            progress: 0,
            error_message: None,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_params() -> serde_json::Value {
        json!({
            "zone_lookback_bars": 100,
            "min_zone_touches": 2,
        })
    }

    #[test]
    fn idempotency_key_is_stable_for_identical_inputs() {
        let strategy = Uuid::new_v4();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let a = compute_idempotency_key(strategy, "GC", Timeframe::H1, start, end, &sample_params());
        let b = compute_idempotency_key(strategy, "GC", Timeframe::H1, start, end, &sample_params());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn idempotency_key_changes_with_inputs() {
        let strategy = Uuid::new_v4();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let a = compute_idempotency_key(strategy, "GC", Timeframe::H1, start, end, &sample_params());
        let b = compute_idempotency_key(strategy, "GC", Timeframe::H4, start, end, &sample_params());
        let c = compute_idempotency_key(strategy, "SI", Timeframe::H1, start, end, &sample_params());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn timeframe_roundtrip() {
        for tf in [Timeframe::H1, Timeframe::H4, Timeframe::D1] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("15m".parse::<Timeframe>().is_err());
    }
}
