// src/strategy/metrics.rs
// Equity curve and performance metrics. Everything here is recomputed in
// full from the closed trades; there is no incremental state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::exits::Trade;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub drawdown_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub avg_r_multiple: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub avg_mae: f64,
    pub avg_mfe: f64,
    pub avg_holding_bars: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

impl BacktestMetrics {
    /// The named key/value pairs persisted to the run store.
    pub fn as_named_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("total_trades", self.total_trades as f64),
            ("winning_trades", self.winning_trades as f64),
            ("losing_trades", self.losing_trades as f64),
            ("win_rate", self.win_rate),
            ("total_pnl", self.total_pnl),
            ("total_pnl_pct", self.total_pnl_pct),
            ("avg_win", self.avg_win),
            ("avg_loss", self.avg_loss),
            ("profit_factor", self.profit_factor),
            ("avg_r_multiple", self.avg_r_multiple),
            ("max_drawdown", self.max_drawdown),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("sharpe_ratio", self.sharpe_ratio),
            ("avg_mae", self.avg_mae),
            ("avg_mfe", self.avg_mfe),
            ("avg_holding_bars", self.avg_holding_bars),
            ("largest_win", self.largest_win),
            ("largest_loss", self.largest_loss),
        ]
    }
}

/// One seed point at initial capital plus one point per trade close, ordered
/// by exit time, with drawdown% derived from a running high-water mark.
/// `fallback_timestamp` seeds the curve when there are no trades.
pub fn build_equity_curve(
    trades: &[Trade],
    initial_capital: f64,
    fallback_timestamp: DateTime<Utc>,
) -> Vec<EquityPoint> {
    let seed_timestamp = trades
        .iter()
        .map(|t| t.entry_time)
        .min()
        .unwrap_or(fallback_timestamp);

    let mut curve = Vec::with_capacity(trades.len() + 1);
    curve.push(EquityPoint {
        timestamp: seed_timestamp,
        equity: initial_capital,
        drawdown_pct: 0.0,
    });

    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.exit_time);

    let mut equity = initial_capital;
    let mut high_water = initial_capital;
    for trade in ordered {
        equity += trade.pnl;
        high_water = high_water.max(equity);
        let drawdown_pct = if high_water > 0.0 {
            (high_water - equity) / high_water * 100.0
        } else {
            0.0
        };
        curve.push(EquityPoint {
            timestamp: trade.exit_time,
            equity,
            drawdown_pct,
        });
    }

    curve
}

/// Max drawdown in absolute and percent terms from a running high-water mark.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0.0);
    };

    let mut high_water = first.equity;
    let mut max_dd = 0.0f64;
    let mut max_dd_pct = 0.0f64;
    for point in equity_curve {
        high_water = high_water.max(point.equity);
        let drawdown = high_water - point.equity;
        let drawdown_pct = if high_water > 0.0 {
            drawdown / high_water * 100.0
        } else {
            0.0
        };
        max_dd = max_dd.max(drawdown);
        max_dd_pct = max_dd_pct.max(drawdown_pct);
    }
    (max_dd, max_dd_pct)
}

pub fn calculate(
    trades: &[Trade],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
) -> BacktestMetrics {
    if trades.is_empty() {
        return BacktestMetrics::default();
    }

    let wins: Vec<&Trade> = trades.iter().filter(|t| t.pnl > 0.0).collect();
    let losses: Vec<&Trade> = trades.iter().filter(|t| t.pnl < 0.0).collect();

    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let gross_profit: f64 = wins.iter().map(|t| t.pnl).sum();
    let gross_loss: f64 = losses.iter().map(|t| t.pnl).sum::<f64>().abs();

    let count = trades.len() as f64;
    let avg = |sum: f64, n: usize| if n > 0 { sum / n as f64 } else { 0.0 };

    let (max_dd, max_dd_pct) = max_drawdown(equity_curve);

    BacktestMetrics {
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: wins.len() as f64 / count * 100.0,
        total_pnl,
        total_pnl_pct: total_pnl / initial_capital * 100.0,
        avg_win: avg(gross_profit, wins.len()),
        avg_loss: avg(losses.iter().map(|t| t.pnl).sum(), losses.len()),
        profit_factor: if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        },
        avg_r_multiple: trades.iter().map(|t| t.r_multiple).sum::<f64>() / count,
        max_drawdown: max_dd,
        max_drawdown_pct: max_dd_pct,
        sharpe_ratio: sharpe_ratio(trades),
        avg_mae: trades.iter().map(|t| t.mae).sum::<f64>() / count,
        avg_mfe: trades.iter().map(|t| t.mfe).sum::<f64>() / count,
        avg_holding_bars: trades.iter().map(|t| t.holding_bars as f64).sum::<f64>() / count,
        largest_win: wins.iter().map(|t| t.pnl).fold(0.0, f64::max),
        largest_loss: losses.iter().map(|t| t.pnl).fold(0.0, f64::min),
    }
}

/// Annualized ratio of per-trade PnL% mean over its sample stdev. Treats
/// each trade, not each time period, as one sample; a known approximation
/// kept as-is. Zero with fewer than two trades or a zero stdev.
fn sharpe_ratio(trades: &[Trade]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean) * (r - mean))
        .sum::<f64>()
        / (returns.len() - 1) as f64;
    let stdev = variance.sqrt();
    if stdev == 0.0 {
        return 0.0;
    }
    mean / stdev * 252.0f64.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::exits::ExitReason;
    use crate::strategy::orders::TradeSide;
    use crate::strategy::zones::{ZoneKind, ZoneRef};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn trade(pnl: f64, pnl_pct: f64, exit_hour: u32) -> Trade {
        let entry_time = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        Trade {
            id: Uuid::new_v4(),
            entry_time,
            exit_time: entry_time + Duration::hours(exit_hour as i64),
            side: TradeSide::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            quantity: 1.0,
            pnl,
            pnl_pct,
            r_multiple: pnl / 2.0,
            mae: -1.0,
            mfe: 2.0,
            holding_bars: exit_hour as i64,
            exit_reason: ExitReason::TakeProfit,
            entry_zone: ZoneRef {
                id: Uuid::new_v4(),
                kind: ZoneKind::Demand,
                strength: 0.5,
            },
        }
    }

    fn point(hour: u32, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, hour, 0, 0).unwrap(),
            equity,
            drawdown_pct: 0.0,
        }
    }

    #[test]
    fn empty_trades_yield_all_zero_metrics() {
        let metrics = calculate(&[], &[], 10_000.0);
        for (_, value) in metrics.as_named_values() {
            assert_eq!(value, 0.0);
        }
    }

    #[test]
    fn drawdown_tracks_the_running_high_water_mark() {
        let curve = vec![
            point(0, 100.0),
            point(1, 120.0),
            point(2, 90.0),
            point(3, 130.0),
            point(4, 80.0),
        ];
        let (dd, dd_pct) = max_drawdown(&curve);
        assert!((dd - 50.0).abs() < 1e-9);
        assert!((dd_pct - 50.0 / 130.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn equity_curve_is_seeded_and_ordered_by_exit_time() {
        // Second trade exits before the first.
        let trades = vec![trade(-100.0, -1.0, 10), trade(50.0, 0.5, 5)];
        let fallback = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let curve = build_equity_curve(&trades, 10_000.0, fallback);

        assert_eq!(curve.len(), 3);
        assert_eq!(curve[0].equity, 10_000.0);
        assert_eq!(curve[0].drawdown_pct, 0.0);
        assert!((curve[1].equity - 10_050.0).abs() < 1e-9);
        assert!((curve[2].equity - 9_950.0).abs() < 1e-9);
        assert!(curve[1].timestamp < curve[2].timestamp);
        assert!(curve[2].drawdown_pct > 0.0);
    }

    #[test]
    fn empty_trades_seed_the_curve_from_the_fallback_timestamp() {
        let fallback = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let curve = build_equity_curve(&[], 10_000.0, fallback);
        assert_eq!(curve.len(), 1);
        assert_eq!(curve[0].timestamp, fallback);
    }

    #[test]
    fn win_loss_aggregates() {
        let trades = vec![
            trade(100.0, 1.0, 1),
            trade(-50.0, -0.5, 2),
            trade(200.0, 2.0, 3),
        ];
        let curve = build_equity_curve(&trades, 10_000.0, trades[0].entry_time);
        let metrics = calculate(&trades, &curve, 10_000.0);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 2.0 / 3.0 * 100.0).abs() < 1e-9);
        assert!((metrics.total_pnl - 250.0).abs() < 1e-9);
        assert!((metrics.total_pnl_pct - 2.5).abs() < 1e-9);
        assert!((metrics.avg_win - 150.0).abs() < 1e-9);
        assert!((metrics.avg_loss - -50.0).abs() < 1e-9);
        assert!((metrics.profit_factor - 300.0 / 50.0).abs() < 1e-9);
        assert!((metrics.largest_win - 200.0).abs() < 1e-9);
        assert!((metrics.largest_loss - -50.0).abs() < 1e-9);
        assert!((metrics.avg_holding_bars - 2.0).abs() < 1e-9);
        assert!(metrics.sharpe_ratio != 0.0);
    }

    #[test]
    fn sharpe_is_zero_below_two_trades_or_zero_stdev() {
        let one = vec![trade(100.0, 1.0, 1)];
        let curve = build_equity_curve(&one, 10_000.0, one[0].entry_time);
        assert_eq!(calculate(&one, &curve, 10_000.0).sharpe_ratio, 0.0);

        let flat = vec![trade(100.0, 1.0, 1), trade(100.0, 1.0, 2)];
        let curve = build_equity_curve(&flat, 10_000.0, flat[0].entry_time);
        assert_eq!(calculate(&flat, &curve, 10_000.0).sharpe_ratio, 0.0);
    }

    #[test]
    fn named_values_cover_all_metric_keys() {
        let keys: Vec<&str> = BacktestMetrics::default()
            .as_named_values()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys.len(), 18);
        assert!(keys.contains(&"sharpe_ratio"));
        assert!(keys.contains(&"avg_holding_bars"));
    }
}
