//! Market-cycle phase classification

use std::fmt;

use serde::{Deserialize, Serialize};

use super::WyckoffConfig;
use crate::detectors::helpers::mean_close;
use crate::OHLCV;

/// Short moving average length used for trend comparison
pub const SHORT_MA: usize = 10;
/// Long moving average length used for trend comparison
pub const LONG_MA: usize = 30;
/// Bars per half of the recent/older volume comparison
pub const VOLUME_COMPARE_BARS: usize = 10;

/// Coarse Wyckoff market-cycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WyckoffPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    #[default]
    Unknown,
}

impl fmt::Display for WyckoffPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WyckoffPhase::Accumulation => "Accumulation",
            WyckoffPhase::Markup => "Markup",
            WyckoffPhase::Distribution => "Distribution",
            WyckoffPhase::Markdown => "Markdown",
            WyckoffPhase::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Inputs behind a phase decision, kept for commentary and debugging
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseReading {
    pub phase: WyckoffPhase,
    /// Last close inside the window's high-low range, 0.0 at the low
    pub position_in_range: f64,
    pub range_high: f64,
    pub range_low: f64,
    pub short_ma: f64,
    pub long_ma: f64,
    pub volume_increasing: bool,
    pub ranging: bool,
}

/// Classify the phase over the trailing `config.phase_window` bars.
///
/// Accumulation and Distribution need a tight range with rising volume and
/// price in the lower 40% or upper 60% of it. Otherwise a close above both
/// averages with the short average clearly above the long one is Markup, and
/// the mirror is Markdown.
pub fn classify_phase<T: OHLCV>(bars: &[T], config: &WyckoffConfig) -> PhaseReading {
    let start = bars.len().saturating_sub(config.phase_window.get());
    let window = &bars[start..];

    let mut reading = PhaseReading {
        phase: WyckoffPhase::Unknown,
        position_in_range: 0.5,
        range_high: 0.0,
        range_low: 0.0,
        short_ma: 0.0,
        long_ma: 0.0,
        volume_increasing: false,
        ranging: false,
    };
    let Some(last) = window.last() else {
        return reading;
    };

    let high = window.iter().map(|b| b.high()).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low()).fold(f64::MAX, f64::min);
    let range = high - low;
    let close = last.close();

    reading.range_high = high;
    reading.range_low = low;
    if range > 0.0 {
        reading.position_in_range = (close - low) / range;
    }
    reading.short_ma = mean_close(window, SHORT_MA);
    reading.long_ma = mean_close(window, LONG_MA);
    reading.volume_increasing = volume_increasing(window);
    reading.ranging = high > 0.0 && range / high < config.range_tolerance;

    let position = reading.position_in_range;
    reading.phase = if reading.ranging && reading.volume_increasing && position < 0.4 {
        WyckoffPhase::Accumulation
    } else if reading.ranging && reading.volume_increasing && position > 0.6 {
        WyckoffPhase::Distribution
    } else if close > reading.short_ma
        && close > reading.long_ma
        && reading.short_ma > reading.long_ma * (1.0 + config.trend_margin)
    {
        WyckoffPhase::Markup
    } else if close < reading.short_ma
        && close < reading.long_ma
        && reading.short_ma < reading.long_ma * (1.0 - config.trend_margin)
    {
        WyckoffPhase::Markdown
    } else {
        WyckoffPhase::Unknown
    };

    reading
}

/// Mean volume of the last 10 bars against the 10 before them
fn volume_increasing<T: OHLCV>(window: &[T]) -> bool {
    let n = window.len();
    if n < 2 * VOLUME_COMPARE_BARS {
        return false;
    }
    let mean = |bars: &[T]| bars.iter().map(|b| b.volume()).sum::<f64>() / bars.len() as f64;
    let recent = mean(&window[n - VOLUME_COMPARE_BARS..]);
    let older = mean(&window[n - 2 * VOLUME_COMPARE_BARS..n - VOLUME_COMPARE_BARS]);
    recent > older
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn bar(close: f64, volume: f64) -> Candle {
        Candle::new(close, close + 0.0005, close - 0.0005, close).with_volume(volume)
    }

    #[test]
    fn test_accumulation() {
        let mut bars: Vec<Candle> = (0..50)
            .map(|i| {
                let close = if i % 2 == 0 { 1.0960 } else { 1.1040 };
                bar(close, if i < 40 { 100.0 } else { 200.0 })
            })
            .collect();
        bars[49] = bar(1.0970, 200.0);

        let reading = classify_phase(&bars, &WyckoffConfig::default());
        assert!(reading.ranging);
        assert!(reading.volume_increasing);
        assert!(reading.position_in_range < 0.4);
        assert_eq!(reading.phase, WyckoffPhase::Accumulation);
    }

    #[test]
    fn test_distribution() {
        let mut bars: Vec<Candle> = (0..50)
            .map(|i| {
                let close = if i % 2 == 0 { 1.0960 } else { 1.1040 };
                bar(close, if i < 40 { 100.0 } else { 200.0 })
            })
            .collect();
        bars[49] = bar(1.1030, 200.0);

        assert_eq!(classify_phase(&bars, &WyckoffConfig::default()).phase, WyckoffPhase::Distribution);
    }

    #[test]
    fn test_markup_and_markdown() {
        let up: Vec<Candle> = (0..50).map(|i| bar(1.1000 + 0.001 * i as f64, 100.0)).collect();
        let reading = classify_phase(&up, &WyckoffConfig::default());
        assert!(!reading.ranging);
        assert_eq!(reading.phase, WyckoffPhase::Markup);

        let down: Vec<Candle> = (0..50).map(|i| bar(1.2000 - 0.001 * i as f64, 100.0)).collect();
        assert_eq!(classify_phase(&down, &WyckoffConfig::default()).phase, WyckoffPhase::Markdown);
    }

    #[test]
    fn test_flat_is_unknown() {
        let flat: Vec<Candle> = (0..50).map(|_| bar(1.1000, 0.0)).collect();
        assert_eq!(classify_phase(&flat, &WyckoffConfig::default()).phase, WyckoffPhase::Unknown);

        let empty: Vec<Candle> = Vec::new();
        assert_eq!(classify_phase(&empty, &WyckoffConfig::default()).phase, WyckoffPhase::Unknown);
    }
}
