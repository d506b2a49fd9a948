// src/strategy/orders.rs
// Entry simulation: limit-order fills, risk-based sizing, extreme tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::zones::{Zone, ZoneRef};
use crate::types::Bar;

/// GC futures tick size.
pub const TICK_SIZE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Long,
    Short,
}

/// An open position. Mutable, owned exclusively by the executing worker,
/// destroyed by conversion into a `Trade`.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: Uuid,
    pub entry_time: DateTime<Utc>,
    pub side: TradeSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub initial_risk: f64,
    pub highest_notional: f64,
    pub lowest_notional: f64,
    pub entry_zone: ZoneRef,
}

pub struct OrderManager {
    stoploss_atr_multiple: f64,
    takeprofit_r_multiple: f64,
    risk_per_trade_pct: f64,
    max_concurrent_trades: usize,
    limit_order_offset_ticks: u32,
}

impl OrderManager {
    pub fn new(
        stoploss_atr_multiple: f64,
        takeprofit_r_multiple: f64,
        risk_per_trade_pct: f64,
        max_concurrent_trades: usize,
        limit_order_offset_ticks: u32,
    ) -> Self {
        Self {
            stoploss_atr_multiple,
            takeprofit_r_multiple,
            risk_per_trade_pct,
            max_concurrent_trades,
            limit_order_offset_ticks,
        }
    }

    pub fn can_enter(&self, open_positions: usize) -> bool {
        open_positions < self.max_concurrent_trades
    }

    fn offset(&self) -> f64 {
        self.limit_order_offset_ticks as f64 * TICK_SIZE
    }

    /// Simulates a long limit order at zone.high + offset: fills only when
    /// the bar trades down to the limit, at min(limit, bar.high).
    pub fn try_enter_long(
        &self,
        bar: &Bar,
        demand_zone: &Zone,
        atr: f64,
        current_equity: f64,
    ) -> Option<Position> {
        let limit_price = demand_zone.high + self.offset();
        if bar.low > limit_price {
            return None;
        }
        let entry_price = limit_price.min(bar.high);
        let stop_loss = demand_zone.low - self.stoploss_atr_multiple * atr;
        let initial_risk = entry_price - stop_loss;
        self.build_position(
            bar,
            demand_zone,
            TradeSide::Long,
            entry_price,
            stop_loss,
            initial_risk,
            current_equity,
        )
    }

    /// Mirrored short entry: limit at zone.low - offset, fills when the bar
    /// trades up to the limit, at max(limit, bar.low).
    pub fn try_enter_short(
        &self,
        bar: &Bar,
        supply_zone: &Zone,
        atr: f64,
        current_equity: f64,
    ) -> Option<Position> {
        let limit_price = supply_zone.low - self.offset();
        if bar.high < limit_price {
            return None;
        }
        let entry_price = limit_price.max(bar.low);
        let stop_loss = supply_zone.high + self.stoploss_atr_multiple * atr;
        let initial_risk = stop_loss - entry_price;
        self.build_position(
            bar,
            supply_zone,
            TradeSide::Short,
            entry_price,
            stop_loss,
            initial_risk,
            current_equity,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_position(
        &self,
        bar: &Bar,
        zone: &Zone,
        side: TradeSide,
        entry_price: f64,
        stop_loss: f64,
        initial_risk: f64,
        current_equity: f64,
    ) -> Option<Position> {
        if initial_risk <= 0.0 {
            return None; // invalid risk
        }

        let risk_amount = current_equity * (self.risk_per_trade_pct / 100.0);
        let quantity = risk_amount / initial_risk;
        let take_profit = match side {
            TradeSide::Long => entry_price + initial_risk * self.takeprofit_r_multiple,
            TradeSide::Short => entry_price - initial_risk * self.takeprofit_r_multiple,
        };
        let entry_notional = entry_price * quantity;

        Some(Position {
            id: Uuid::new_v4(),
            entry_time: bar.timestamp,
            side,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            initial_risk,
            highest_notional: entry_notional,
            lowest_notional: entry_notional,
            entry_zone: zone.reference(),
        })
    }

    /// Tracks the best/worst notional value the position has seen, feeding
    /// MAE/MFE at close time. Short notionals are mirrored around entry.
    pub fn update_extremes(&self, position: &mut Position, bar: &Bar) {
        match position.side {
            TradeSide::Long => {
                position.highest_notional = position
                    .highest_notional
                    .max(bar.high * position.quantity);
                position.lowest_notional =
                    position.lowest_notional.min(bar.low * position.quantity);
            }
            TradeSide::Short => {
                let best = (2.0 * position.entry_price - bar.low) * position.quantity;
                let worst = (2.0 * position.entry_price - bar.high) * position.quantity;
                position.highest_notional = position.highest_notional.max(best);
                position.lowest_notional = position.lowest_notional.min(worst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::zones::ZoneKind;
    use chrono::{TimeZone, Utc};

    fn bar(high: f64, low: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
        }
    }

    fn zone(kind: ZoneKind, high: f64, low: f64) -> Zone {
        Zone {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            kind,
            high,
            low,
            strength: 0.5,
            touches: 2,
            detected_at_index: 0,
        }
    }

    fn manager() -> OrderManager {
        OrderManager::new(1.0, 2.0, 1.0, 3, 0)
    }

    #[test]
    fn long_limit_fills_at_min_of_limit_and_bar_high() {
        let demand = zone(ZoneKind::Demand, 99.0, 98.0);
        // Bar trades down through the limit: fills at the limit.
        let position = manager()
            .try_enter_long(&bar(100.0, 98.5), &demand, 1.0, 10_000.0)
            .unwrap();
        assert!((position.entry_price - 99.0).abs() < 1e-12);
        assert_eq!(position.side, TradeSide::Long);
        // A gap-down bar entirely below the limit fills at the bar high.
        let gapped = manager()
            .try_enter_long(&bar(98.8, 98.2), &demand, 1.0, 10_000.0)
            .unwrap();
        assert!((gapped.entry_price - 98.8).abs() < 1e-12);
    }

    #[test]
    fn long_limit_does_not_fill_above_the_limit() {
        let demand = zone(ZoneKind::Demand, 99.0, 98.0);
        assert!(manager()
            .try_enter_long(&bar(100.0, 99.5), &demand, 1.0, 10_000.0)
            .is_none());
    }

    #[test]
    fn short_limit_is_mirrored() {
        let supply = zone(ZoneKind::Supply, 102.0, 101.0);
        let position = manager()
            .try_enter_short(&bar(101.5, 100.5), &supply, 1.0, 10_000.0)
            .unwrap();
        assert!((position.entry_price - 101.0).abs() < 1e-12);
        assert_eq!(position.side, TradeSide::Short);
        assert!(manager()
            .try_enter_short(&bar(100.5, 100.0), &supply, 1.0, 10_000.0)
            .is_none());
    }

    #[test]
    fn quantity_scales_with_risk_budget() {
        let demand = zone(ZoneKind::Demand, 99.0, 98.0);
        let position = manager()
            .try_enter_long(&bar(100.0, 98.5), &demand, 1.0, 10_000.0)
            .unwrap();
        // stop = 98 - 1*1 = 97, risk = 99 - 97 = 2, budget = 1% of 10k = 100
        assert!((position.stop_loss - 97.0).abs() < 1e-12);
        assert!((position.initial_risk - 2.0).abs() < 1e-12);
        assert!((position.quantity - 50.0).abs() < 1e-12);
        // take profit = entry + risk * 2R
        assert!((position.take_profit - 103.0).abs() < 1e-12);
    }

    #[test]
    fn non_positive_risk_rejects_the_entry() {
        // Wide ATR pushes the short stop below the entry price.
        let supply = zone(ZoneKind::Supply, 102.0, 101.0);
        let manager = OrderManager::new(-2.0, 2.0, 1.0, 3, 0);
        assert!(manager
            .try_enter_short(&bar(101.5, 100.5), &supply, 1.0, 10_000.0)
            .is_none());
    }

    #[test]
    fn capacity_gate_counts_open_positions() {
        let manager = OrderManager::new(1.0, 2.0, 1.0, 2, 0);
        assert!(manager.can_enter(0));
        assert!(manager.can_enter(1));
        assert!(!manager.can_enter(2));
    }

    #[test]
    fn extremes_track_best_and_worst_notional() {
        let demand = zone(ZoneKind::Demand, 99.0, 98.0);
        let manager = manager();
        let mut position = manager
            .try_enter_long(&bar(100.0, 98.5), &demand, 1.0, 10_000.0)
            .unwrap();
        let entry_notional = position.entry_price * position.quantity;

        manager.update_extremes(&mut position, &bar(101.0, 98.0));
        assert!((position.highest_notional - 101.0 * position.quantity).abs() < 1e-9);
        assert!((position.lowest_notional - 98.0 * position.quantity).abs() < 1e-9);
        assert!(position.highest_notional > entry_notional);
        assert!(position.lowest_notional < entry_notional);
    }
}
