// src/strategy/exits.rs
// Exit evaluation and the Position -> Trade conversion.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::orders::{Position, TradeSide};
use crate::strategy::zones::ZoneRef;
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeLimit,
}

/// A closed trade. Immutable once created; exactly one per closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub side: TradeSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub r_multiple: f64,
    pub mae: f64,
    pub mfe: f64,
    pub holding_bars: i64,
    pub exit_reason: ExitReason,
    pub entry_zone: ZoneRef,
}

pub struct ExitManager {
    bar_duration: Duration,
}

impl ExitManager {
    pub fn new(bar_duration: Duration) -> Self {
        Self { bar_duration }
    }

    /// Stop-loss is checked before take-profit: a bar breaching both in the
    /// same bar closes at the stop price.
    pub fn check_exit(&self, position: &Position, bar: &Bar) -> Option<(ExitReason, f64)> {
        match position.side {
            TradeSide::Long => {
                if bar.low <= position.stop_loss {
                    return Some((ExitReason::StopLoss, position.stop_loss));
                }
                if bar.high >= position.take_profit {
                    return Some((ExitReason::TakeProfit, position.take_profit));
                }
            }
            TradeSide::Short => {
                if bar.high >= position.stop_loss {
                    return Some((ExitReason::StopLoss, position.stop_loss));
                }
                if bar.low <= position.take_profit {
                    return Some((ExitReason::TakeProfit, position.take_profit));
                }
            }
        }
        None
    }

    /// Consumes the position and produces the immutable trade record. The
    /// trade keeps only a `ZoneRef`, never a reference back to the position.
    pub fn close_position(
        &self,
        position: Position,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
        exit_price: f64,
    ) -> Trade {
        let pnl = match position.side {
            TradeSide::Long => (exit_price - position.entry_price) * position.quantity,
            TradeSide::Short => (position.entry_price - exit_price) * position.quantity,
        };

        let entry_notional = position.entry_price * position.quantity;
        let pnl_pct = pnl / entry_notional * 100.0;
        let r_multiple = pnl / (position.initial_risk * position.quantity);
        let mae = (position.lowest_notional - entry_notional) / entry_notional * 100.0;
        let mfe = (position.highest_notional - entry_notional) / entry_notional * 100.0;

        let bar_seconds = self.bar_duration.num_seconds().max(1);
        let holding_bars = (exit_time - position.entry_time).num_seconds() / bar_seconds;

        Trade {
            id: Uuid::new_v4(),
            entry_time: position.entry_time,
            exit_time,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            pnl,
            pnl_pct,
            r_multiple,
            mae,
            mfe,
            holding_bars,
            exit_reason: reason,
            entry_zone: position.entry_zone,
        }
    }
}
