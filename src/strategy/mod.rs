// src/strategy/mod.rs
// Pure simulation engine: bars + parameters in, trades/zones/metrics out.

pub mod engine;
pub mod exits;
pub mod indicators;
pub mod metrics;
pub mod orders;
pub mod session;
pub mod zones;

pub use engine::{BacktestReport, StrategyEngine};
pub use exits::{ExitReason, Trade};
pub use metrics::{BacktestMetrics, EquityPoint};
pub use orders::{Position, TradeSide};
pub use zones::{Zone, ZoneKind};
