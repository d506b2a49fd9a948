// src/strategy/indicators.rs
use crate::types::Bar;

pub const ATR_PERIOD: usize = 14;

/// ATR series aligned 1:1 with the bars: a simple moving average of true
/// range over the trailing `period` bars, 0 until enough history exists
/// (the bar at index `period` is the first with a value).
pub fn atr_series(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut atr = vec![0.0; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return atr;
    }

    let mut true_ranges = Vec::with_capacity(bars.len());
    for i in 1..bars.len() {
        true_ranges.push(true_range(&bars[i], bars[i - 1].close));
    }

    // Rolling sum over the last `period` true ranges.
    let mut window_sum = 0.0;
    for (ti, tr) in true_ranges.iter().enumerate() {
        window_sum += tr;
        if ti >= period {
            window_sum -= true_ranges[ti - period];
        }
        if ti + 1 >= period {
            atr[ti + 1] = window_sum / period as f64;
        }
    }

    atr
}

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_with_ranges(ranges: &[(f64, f64, f64)]) -> Vec<Bar> {
        // (high, low, close) triples, hourly spacing
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        ranges
            .iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Bar {
                timestamp: start + Duration::hours(i as i64),
                open: close,
                high,
                low,
                close,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn atr_is_zero_until_enough_history() {
        let bars = bars_with_ranges(&vec![(100.5, 99.5, 100.0); 20]);
        let atr = atr_series(&bars, ATR_PERIOD);
        assert_eq!(atr.len(), 20);
        for value in atr.iter().take(ATR_PERIOD) {
            assert_eq!(*value, 0.0);
        }
        for value in atr.iter().skip(ATR_PERIOD) {
            assert!((value - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn atr_averages_true_range_over_the_window() {
        // Bars with a single wide-range outlier inside the window.
        let mut ranges = vec![(100.5, 99.5, 100.0); 20];
        ranges[10] = (101.5, 98.5, 100.0); // TR = 3.0
        let bars = bars_with_ranges(&ranges);
        let atr = atr_series(&bars, ATR_PERIOD);
        // At index 14 the window covers TRs 1..=14, which include the outlier.
        let expected = (13.0 + 3.0) / 14.0;
        assert!((atr[14] - expected).abs() < 1e-12);
        // Once the outlier leaves the window the ATR settles back to 1.0.
        // TR index of the outlier is 9 (bar 10), it leaves at TR index 23.
        // With only 20 bars it never fully leaves here, so check a fresh run:
        let calm = bars_with_ranges(&vec![(100.5, 99.5, 100.0); 40]);
        let calm_atr = atr_series(&calm, ATR_PERIOD);
        assert!((calm_atr[39] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_series_stays_zero() {
        let bars = bars_with_ranges(&vec![(100.5, 99.5, 100.0); 10]);
        let atr = atr_series(&bars, ATR_PERIOD);
        assert!(atr.iter().all(|v| *v == 0.0));
    }
}
