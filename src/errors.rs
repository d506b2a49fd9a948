// src/errors.rs
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the strategy engine for a single run. All variants are
/// terminal for the attempt and count against the run's retry budget.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no market data found for specified date range")]
    NoData,

    #[error("invalid strategy parameters: {0}")]
    InvalidParameters(String),

    #[error("computation failed: {0}")]
    Computation(String),
}

/// Errors from the run store / bar source collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}
