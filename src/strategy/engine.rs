// src/strategy/engine.rs
// The bar-iteration loop: exits, zone discovery, session-gated entries,
// forced close-out, metrics. Deterministic for identical inputs.

use tracing::debug;

use crate::errors::EngineError;
use crate::strategy::exits::{ExitManager, ExitReason, Trade};
use crate::strategy::indicators::{atr_series, ATR_PERIOD};
use crate::strategy::metrics::{self, BacktestMetrics, EquityPoint};
use crate::strategy::orders::{OrderManager, Position};
use crate::strategy::session::SessionFilter;
use crate::strategy::zones::{is_near_duplicate, Zone, ZoneDetector, ZoneKind};
use crate::types::{Bar, StrategyParameters, Timeframe};

/// Everything a completed simulation produces. Persisted by the worker as a
/// single batch.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub zones: Vec<Zone>,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
}

pub struct StrategyEngine {
    params: StrategyParameters,
    initial_capital: f64,
    zone_detector: ZoneDetector,
    order_manager: OrderManager,
    exit_manager: ExitManager,
    session_filter: SessionFilter,
}

impl StrategyEngine {
    pub fn new(params: StrategyParameters, timeframe: Timeframe, initial_capital: f64) -> Self {
        let zone_detector = ZoneDetector::new(
            params.zone_lookback_bars,
            params.min_zone_touches,
            params.zone_width_atr_multiple,
            params.max_zone_age_bars,
        );
        let order_manager = OrderManager::new(
            params.stoploss_atr_multiple,
            params.takeprofit_r_multiple,
            params.risk_per_trade_pct,
            params.max_concurrent_trades,
            params.limit_order_offset_ticks,
        );
        let exit_manager = ExitManager::new(timeframe.bar_duration());
        let session_filter = SessionFilter::new(
            params.include_asian_session,
            params.include_london_session,
            params.include_newyork_session,
        );
        Self {
            params,
            initial_capital,
            zone_detector,
            order_manager,
            exit_manager,
            session_filter,
        }
    }

    /// Replays the bars through the strategy. Progress is reported through
    /// the callback as a monotonically increasing 0-100 value; throttling of
    /// any downstream persistence is the caller's concern.
    pub fn run(
        &self,
        bars: &[Bar],
        progress: &mut dyn FnMut(u8),
    ) -> Result<BacktestReport, EngineError> {
        if bars.is_empty() {
            return Err(EngineError::NoData);
        }

        let atr = atr_series(bars, ATR_PERIOD);
        let total_bars = bars.len();
        let report_every = (total_bars / 20).max(1);

        let mut open_positions: Vec<Position> = Vec::new();
        let mut trades: Vec<Trade> = Vec::new();
        let mut all_zones: Vec<Zone> = Vec::new();
        let mut equity = self.initial_capital;
        let mut last_reported: i32 = -1;

        for (i, bar) in bars.iter().enumerate() {
            let bar_atr = atr[i];
            if bar_atr == 0.0 {
                continue; // indicator not ready, skip the bar entirely
            }

            if i % report_every == 0 {
                let pct = (i * 100 / total_bars) as i32;
                if pct > last_reported {
                    last_reported = pct;
                    progress(pct as u8);
                }
            }

            // Exits first: update extremes, then stop before target.
            let mut still_open = Vec::with_capacity(open_positions.len());
            for mut position in open_positions.drain(..) {
                self.order_manager.update_extremes(&mut position, bar);
                match self.exit_manager.check_exit(&position, bar) {
                    Some((reason, exit_price)) => {
                        let trade = self.exit_manager.close_position(
                            position,
                            bar.timestamp,
                            reason,
                            exit_price,
                        );
                        equity += trade.pnl;
                        trades.push(trade);
                    }
                    None => still_open.push(position),
                }
            }
            open_positions = still_open;

            // Discover zones in the trailing window; suppress near-duplicates.
            // The linear scan is intentional and bounded by the window size.
            if i >= self.params.zone_lookback_bars {
                for candidate in self.zone_detector.detect(bars, i, bar_atr) {
                    let duplicate = all_zones
                        .iter()
                        .any(|existing| is_near_duplicate(existing, &candidate, bar_atr));
                    if !duplicate {
                        debug!(
                            kind = ?candidate.kind,
                            high = candidate.high,
                            low = candidate.low,
                            touches = candidate.touches,
                            "zone detected"
                        );
                        all_zones.push(candidate);
                    }
                }
            }

            let active_zones = self.zone_detector.filter_active(&all_zones, i);

            // Session-gated entries: demand zones long first, then supply
            // zones short, while capacity remains.
            if self.session_filter.is_in_active_session(bar.timestamp) {
                for zone in active_zones.iter().filter(|z| z.kind == ZoneKind::Demand) {
                    if !self.order_manager.can_enter(open_positions.len()) {
                        break;
                    }
                    if let Some(position) =
                        self.order_manager.try_enter_long(bar, zone, bar_atr, equity)
                    {
                        open_positions.push(position);
                    }
                }
                for zone in active_zones.iter().filter(|z| z.kind == ZoneKind::Supply) {
                    if !self.order_manager.can_enter(open_positions.len()) {
                        break;
                    }
                    if let Some(position) =
                        self.order_manager
                            .try_enter_short(bar, zone, bar_atr, equity)
                    {
                        open_positions.push(position);
                    }
                }
            }
        }

        // Force-close whatever is still open at the last close price.
        let last_bar = &bars[total_bars - 1];
        for position in open_positions.drain(..) {
            let trade = self.exit_manager.close_position(
                position,
                last_bar.timestamp,
                ExitReason::TimeLimit,
                last_bar.close,
            );
            equity += trade.pnl;
            trades.push(trade);
        }

        let equity_curve =
            metrics::build_equity_curve(&trades, self.initial_capital, last_bar.timestamp);
        let report_metrics = metrics::calculate(&trades, &equity_curve, self.initial_capital);

        progress(100);

        Ok(BacktestReport {
            trades,
            zones: all_zones,
            metrics: report_metrics,
            equity_curve,
        })
    }
}
