// src/strategy/zones.rs
// Supply/demand zone detection from swing points in a trailing lookback window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Supply,
    Demand,
}

/// A price band inferred from a historical swing point. Created once per
/// detection; near-duplicates are suppressed rather than merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: ZoneKind,
    pub high: f64,
    pub low: f64,
    pub strength: f64,
    pub touches: usize,
    /// Absolute index of the swing bar in the full bar series.
    pub detected_at_index: usize,
}

impl Zone {
    pub fn age_at(&self, current_index: usize) -> usize {
        current_index.saturating_sub(self.detected_at_index)
    }

    pub fn reference(&self) -> ZoneRef {
        ZoneRef {
            id: self.id,
            kind: self.kind,
            strength: self.strength,
        }
    }
}

/// Lightweight handle a position/trade keeps to its originating zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneRef {
    pub id: Uuid,
    pub kind: ZoneKind,
    pub strength: f64,
}

/// Two zones of the same type whose band edges sit within 10% of the current
/// ATR of each other are considered the same zone.
pub fn is_near_duplicate(existing: &Zone, candidate: &Zone, atr: f64) -> bool {
    existing.kind == candidate.kind
        && (existing.high - candidate.high).abs() < atr * 0.1
        && (existing.low - candidate.low).abs() < atr * 0.1
}

pub struct ZoneDetector {
    lookback_bars: usize,
    min_touches: usize,
    width_atr_multiple: f64,
    max_age_bars: usize,
}

impl ZoneDetector {
    pub fn new(
        lookback_bars: usize,
        min_touches: usize,
        width_atr_multiple: f64,
        max_age_bars: usize,
    ) -> Self {
        Self {
            lookback_bars,
            min_touches,
            width_atr_multiple,
            max_age_bars,
        }
    }

    /// Scans the trailing lookback window ending at `current_index`
    /// (exclusive) for swing-point zones. Pure: identical windows and ATR
    /// always yield identical zone sets.
    pub fn detect(&self, bars: &[Bar], current_index: usize, atr: f64) -> Vec<Zone> {
        let mut zones = Vec::new();
        if current_index < self.lookback_bars {
            return zones;
        }

        let window_start = current_index - self.lookback_bars;
        let window = &bars[window_start..current_index];
        let zone_width = atr * self.width_atr_multiple;

        // A bar is a swing high/low when its extreme strictly exceeds both
        // two neighbors on each side.
        for i in 2..window.len().saturating_sub(2) {
            let bar = &window[i];

            let is_swing_high = bar.high > window[i - 1].high
                && bar.high > window[i - 2].high
                && bar.high > window[i + 1].high
                && bar.high > window[i + 2].high;
            if is_swing_high {
                let zone_high = bar.high;
                let zone_low = bar.high - zone_width;
                if let Some(zone) = self.build_zone(
                    window,
                    i,
                    window_start,
                    ZoneKind::Supply,
                    zone_high,
                    zone_low,
                ) {
                    zones.push(zone);
                }
            }

            let is_swing_low = bar.low < window[i - 1].low
                && bar.low < window[i - 2].low
                && bar.low < window[i + 1].low
                && bar.low < window[i + 2].low;
            if is_swing_low {
                let zone_low = bar.low;
                let zone_high = bar.low + zone_width;
                if let Some(zone) = self.build_zone(
                    window,
                    i,
                    window_start,
                    ZoneKind::Demand,
                    zone_high,
                    zone_low,
                ) {
                    zones.push(zone);
                }
            }
        }

        zones
    }

    fn build_zone(
        &self,
        window: &[Bar],
        swing_idx: usize,
        window_start: usize,
        kind: ZoneKind,
        zone_high: f64,
        zone_low: f64,
    ) -> Option<Zone> {
        let touches = count_touches(window, swing_idx, zone_low, zone_high);
        if touches < self.min_touches {
            return None;
        }
        let age_at_detection = window.len() - swing_idx;
        Some(Zone {
            id: Uuid::new_v4(),
            timestamp: window[swing_idx].timestamp,
            kind,
            high: zone_high,
            low: zone_low,
            strength: self.strength(touches, age_at_detection),
            touches,
            detected_at_index: window_start + swing_idx,
        })
    }

    /// More touches make a zone stronger, with a decay floor as the swing
    /// ages toward the max zone age.
    fn strength(&self, touches: usize, age_at_detection: usize) -> f64 {
        let touch_score = (touches as f64 / 5.0).min(1.0);
        let age_decay = (1.0 - age_at_detection as f64 / self.max_age_bars as f64).max(0.1);
        touch_score * age_decay
    }

    /// Zones older than the max age are filtered out, not mutated.
    pub fn filter_active(&self, zones: &[Zone], current_index: usize) -> Vec<Zone> {
        zones
            .iter()
            .filter(|z| z.age_at(current_index) <= self.max_age_bars)
            .cloned()
            .collect()
    }
}

fn count_touches(window: &[Bar], swing_idx: usize, zone_low: f64, zone_high: f64) -> usize {
    window[swing_idx + 1..]
        .iter()
        .filter(|bar| bar.low <= zone_high && bar.high >= zone_low)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_highs_lows(pairs: &[(f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        pairs
            .iter()
            .enumerate()
            .map(|(i, &(high, low))| Bar {
                timestamp: start + Duration::hours(i as i64),
                open: (high + low) / 2.0,
                high,
                low,
                close: (high + low) / 2.0,
                volume: 1.0,
            })
            .collect()
    }

    fn fingerprint(zones: &[Zone]) -> Vec<(ZoneKind, u64, u64, usize, usize)> {
        zones
            .iter()
            .map(|z| {
                (
                    z.kind,
                    z.high.to_bits(),
                    z.low.to_bits(),
                    z.touches,
                    z.detected_at_index,
                )
            })
            .collect()
    }

    #[test]
    fn swing_high_with_enough_touches_becomes_a_supply_zone() {
        // Highs [1,2,3,5,4.6,4.8,1]: the 5 exceeds its two neighbors on each
        // side, and two later bars overlap the [4.5, 5.0] band.
        let pairs = [
            (1.0, 0.5),
            (2.0, 1.5),
            (3.0, 2.5),
            (5.0, 4.4),
            (4.6, 4.2),
            (4.8, 4.3),
            (1.0, 0.5),
            (1.0, 0.5), // current bar, outside the window
        ];
        let bars = bars_from_highs_lows(&pairs);
        let detector = ZoneDetector::new(7, 2, 0.5, 100);
        let zones = detector.detect(&bars, 7, 1.0);

        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.kind, ZoneKind::Supply);
        assert!((zone.high - 5.0).abs() < 1e-12);
        assert!((zone.low - 4.5).abs() < 1e-12);
        assert_eq!(zone.touches, 2);
        assert_eq!(zone.detected_at_index, 3);
    }

    #[test]
    fn swing_without_touches_is_rejected() {
        // Same swing shape but nothing returns to the band afterwards.
        let pairs = [
            (1.0, 0.5),
            (2.0, 1.5),
            (3.0, 2.5),
            (5.0, 4.4),
            (3.0, 2.5),
            (2.0, 1.5),
            (1.0, 0.5),
            (1.0, 0.5),
        ];
        let bars = bars_from_highs_lows(&pairs);
        let detector = ZoneDetector::new(7, 2, 0.5, 100);
        assert!(detector.detect(&bars, 7, 1.0).is_empty());
    }

    #[test]
    fn detection_is_a_pure_function_of_window_and_atr() {
        let pairs = [
            (1.0, 0.5),
            (2.0, 1.5),
            (3.0, 2.5),
            (5.0, 4.4),
            (4.6, 4.2),
            (4.8, 4.3),
            (1.0, 0.5),
            (1.0, 0.5),
        ];
        let bars = bars_from_highs_lows(&pairs);
        let detector = ZoneDetector::new(7, 2, 0.5, 100);
        let first = detector.detect(&bars, 7, 1.0);
        let second = detector.detect(&bars, 7, 1.0);
        assert_eq!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn near_duplicate_suppression_uses_atr_tolerance() {
        let base = Zone {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: ZoneKind::Supply,
            high: 100.0,
            low: 99.0,
            strength: 0.5,
            touches: 3,
            detected_at_index: 10,
        };
        let mut close_by = base.clone();
        close_by.id = Uuid::new_v4();
        close_by.high = 100.04;
        close_by.low = 99.04;
        assert!(is_near_duplicate(&base, &close_by, 1.0));

        let mut far = base.clone();
        far.high = 100.5;
        assert!(!is_near_duplicate(&base, &far, 1.0));

        let mut other_kind = close_by.clone();
        other_kind.kind = ZoneKind::Demand;
        assert!(!is_near_duplicate(&base, &other_kind, 1.0));
    }

    #[test]
    fn aged_zones_are_filtered_out() {
        let detector = ZoneDetector::new(7, 2, 0.5, 50);
        let zone = Zone {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: ZoneKind::Demand,
            high: 100.0,
            low: 99.0,
            strength: 0.5,
            touches: 2,
            detected_at_index: 10,
        };
        assert_eq!(detector.filter_active(&[zone.clone()], 60).len(), 1);
        assert_eq!(detector.filter_active(&[zone], 61).len(), 0);
    }
}
