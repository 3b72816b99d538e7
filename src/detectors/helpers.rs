//! Common helper functions shared by the smart-money detectors
//!
//! Pip sizing, bounds-checked lookback windows, swing-point extraction and
//! the rolling averages used by the Wyckoff analyzer.

use serde::Serialize;

use crate::{OHLCVExt, OHLCV};

// ============================================================
// PIP SIZE
// ============================================================

/// Pip size for JPY-quoted pairs
pub const JPY_PIP_SIZE: f64 = 0.01;
/// Pip size for every other symbol
pub const DEFAULT_PIP_SIZE: f64 = 0.0001;

/// Price value of one pip for `symbol`.
///
/// Any symbol containing `"JPY"` is treated as JPY-quoted.
#[inline]
pub fn pip_size(symbol: &str) -> f64 {
    if symbol.contains("JPY") {
        JPY_PIP_SIZE
    } else {
        DEFAULT_PIP_SIZE
    }
}

/// Clamp a weighted-factor score into 0..=100
#[inline]
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

// ============================================================
// LOOKBACK WINDOW
// ============================================================

/// Read-only view over the trailing `lookback` candles of a series.
///
/// Positions inside the window are relative (`0..len()`); every index handed
/// back to callers goes through [`LookbackWindow::absolute`] so detections
/// always reference the caller's original slice.
#[derive(Debug, Clone, Copy)]
pub struct LookbackWindow<'a, T> {
    bars:   &'a [T],
    offset: usize,
}

impl<'a, T: OHLCV> LookbackWindow<'a, T> {
    /// Trailing window of at most `lookback` candles.
    pub fn trailing(candles: &'a [T], lookback: usize) -> Self {
        let offset = candles.len().saturating_sub(lookback);
        Self { bars: &candles[offset..], offset }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    #[inline]
    pub fn get(&self, pos: usize) -> Option<&'a T> {
        self.bars.get(pos)
    }

    #[inline]
    pub fn bars(&self) -> &'a [T] {
        self.bars
    }

    /// Absolute index in the caller's slice for window position `pos`
    #[inline]
    pub fn absolute(&self, pos: usize) -> usize {
        self.offset + pos
    }

    /// Window position for an absolute index, if it falls inside the window
    #[inline]
    pub fn relative(&self, index: usize) -> Option<usize> {
        index
            .checked_sub(self.offset)
            .filter(|pos| *pos < self.bars.len())
    }

    /// Candles in `[start, end)` clamped to the window bounds
    pub fn slice(&self, start: usize, end: usize) -> &'a [T] {
        let end = end.min(self.bars.len());
        let start = start.min(end);
        &self.bars[start..end]
    }

    /// Candles strictly after window position `pos`
    pub fn after(&self, pos: usize) -> &'a [T] {
        self.slice(pos + 1, self.bars.len())
    }

    /// Up to `count` candles ending just before window position `pos`
    pub fn before(&self, pos: usize, count: usize) -> &'a [T] {
        self.slice(pos.saturating_sub(count), pos)
    }
}

// ============================================================
// SWING POINTS
// ============================================================

/// Swing side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// Local extremum over a symmetric window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwingPoint {
    pub kind:      SwingKind,
    pub price:     f64,
    /// Absolute candle index
    pub index:     usize,
    pub timestamp: Option<i64>,
}

impl SwingPoint {
    pub fn new(kind: SwingKind, price: f64, index: usize) -> Self {
        Self { kind, price, index, timestamp: None }
    }
}

/// Default number of candles compared on each side of a swing
pub const SWING_RADIUS: usize = 2;

/// Swing highs or lows inside `window`.
///
/// A candle is a swing high when its high is strictly greater than the highs
/// of the `radius` candles on both sides (mirror for lows). The first and last
/// `radius` candles can never qualify.
pub fn swing_points<T: OHLCV>(
    window: &LookbackWindow<'_, T>,
    kind: SwingKind,
    radius: usize,
) -> Vec<SwingPoint> {
    let bars = window.bars();
    if radius == 0 || bars.len() < 2 * radius + 1 {
        return Vec::new();
    }

    let value = |bar: &T| match kind {
        SwingKind::High => bar.high(),
        SwingKind::Low => bar.low(),
    };
    let beats = |candidate: f64, other: f64| match kind {
        SwingKind::High => candidate > other,
        SwingKind::Low => candidate < other,
    };

    (radius..bars.len() - radius)
        .filter_map(|pos| {
            let candidate = value(&bars[pos]);
            let is_swing = (1..=radius).all(|k| {
                beats(candidate, value(&bars[pos - k])) && beats(candidate, value(&bars[pos + k]))
            });
            is_swing.then(|| SwingPoint {
                kind,
                price: candidate,
                index: window.absolute(pos),
                timestamp: bars[pos].timestamp(),
            })
        })
        .collect()
}

/// Swing highs and lows merged in chronological order (highs first on ties)
pub fn merged_swings<T: OHLCV>(window: &LookbackWindow<'_, T>, radius: usize) -> Vec<SwingPoint> {
    let mut swings = swing_points(window, SwingKind::High, radius);
    swings.extend(swing_points(window, SwingKind::Low, radius));
    swings.sort_by_key(|s| (s.index, matches!(s.kind, SwingKind::Low)));
    swings
}

// ============================================================
// ROLLING AVERAGES
// ============================================================

/// Simple moving average over the trailing `period` values ending at each
/// position. Early positions average whatever history exists.
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        out.push(sum / (i + 1).min(period) as f64);
    }
    out
}

/// True range series: the first bar uses its own high-low range
pub fn true_ranges<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| match i.checked_sub(1).and_then(|p| bars.get(p)) {
            Some(prev) => {
                let prev_close = prev.close();
                bar.range()
                    .max((bar.high() - prev_close).abs())
                    .max((bar.low() - prev_close).abs())
            },
            None => bar.range(),
        })
        .collect()
}

/// Average true range per bar
pub fn atr<T: OHLCV>(bars: &[T], period: usize) -> Vec<f64> {
    rolling_mean(&true_ranges(bars), period)
}

/// Volume moving average per bar
pub fn volume_ma<T: OHLCV>(bars: &[T], period: usize) -> Vec<f64> {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume()).collect();
    rolling_mean(&volumes, period)
}

/// Mean close of the trailing `period` bars (or all bars if fewer)
pub fn mean_close<T: OHLCV>(bars: &[T], period: usize) -> f64 {
    let start = bars.len().saturating_sub(period);
    let slice = &bars[start..];
    if slice.is_empty() {
        return 0.0;
    }
    slice.iter().map(|b| b.close()).sum::<f64>() / slice.len() as f64
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn bar(h: f64, l: f64) -> Candle {
        Candle::new((h + l) / 2.0, h, l, (h + l) / 2.0)
    }

    #[test]
    fn test_pip_size() {
        assert_eq!(pip_size("USDJPY"), 0.01);
        assert_eq!(pip_size("EURJPY.m"), 0.01);
        assert_eq!(pip_size("EURUSD"), 0.0001);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(120.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }

    #[test]
    fn test_window_absolute_indices() {
        let bars: Vec<Candle> = (0..10).map(|i| bar(2.0 + i as f64, 1.0)).collect();
        let window = LookbackWindow::trailing(&bars, 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window.absolute(0), 6);
        assert_eq!(window.relative(9), Some(3));
        assert_eq!(window.relative(5), None);
        assert_eq!(window.relative(10), None);
        assert_eq!(window.slice(2, 99).len(), 2);
        assert!(window.before(0, 3).is_empty());
        assert_eq!(window.after(3).len(), 0);
    }

    #[test]
    fn test_window_larger_than_series() {
        let bars: Vec<Candle> = (0..3).map(|_| bar(2.0, 1.0)).collect();
        let window = LookbackWindow::trailing(&bars, 50);
        assert_eq!(window.len(), 3);
        assert_eq!(window.absolute(0), 0);
    }

    #[test]
    fn test_swing_high_and_low() {
        let highs = [1.0, 2.0, 5.0, 2.0, 1.0, 2.0, 3.0];
        let bars: Vec<Candle> = highs.iter().map(|h| bar(*h, h - 0.5)).collect();
        let window = LookbackWindow::trailing(&bars, 50);

        let swings = swing_points(&window, SwingKind::High, 2);
        assert_eq!(swings.len(), 1);
        assert_eq!(swings[0].index, 2);
        assert_eq!(swings[0].price, 5.0);

        let lows = swing_points(&window, SwingKind::Low, 2);
        assert_eq!(lows.len(), 1);
        assert_eq!(lows[0].index, 4);
    }

    #[test]
    fn test_plateau_is_not_a_swing() {
        let bars: Vec<Candle> = [1.0, 2.0, 5.0, 5.0, 2.0, 1.0]
            .iter()
            .map(|h| bar(*h, h - 0.5))
            .collect();
        let window = LookbackWindow::trailing(&bars, 50);
        assert!(swing_points(&window, SwingKind::High, 2).is_empty());
    }

    #[test]
    fn test_rolling_mean() {
        let means = rolling_mean(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(means, vec![2.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let bars = vec![Candle::new(1.0, 1.2, 0.9, 1.0), Candle::new(1.5, 1.6, 1.4, 1.5)];
        let tr = true_ranges(&bars);
        assert!((tr[0] - 0.3).abs() < 1e-12);
        // gap up: high - prev close dominates
        assert!((tr[1] - 0.6).abs() < 1e-12);
    }
}
