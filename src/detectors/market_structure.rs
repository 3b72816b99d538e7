//! Market structure: trend from swing sequences, BOS and CHoCH events
//!
//! The first three swings set the initial trend. Each later swing is compared
//! with the previous swing of the same kind: extending the trend is a Break of
//! Structure (BOS), breaking against it is a Change of Character (CHoCH) and
//! flips the trend. Only CHoCH events change a Bullish/Bearish trend.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::helpers::{merged_swings, LookbackWindow, SwingKind, SwingPoint, SWING_RADIUS};
use crate::{
    cache::SymbolCache,
    params::{get_period, ParamMeta, ParameterizedDetector},
    Direction, PatternError, Period, Result, SmcDetector, TradeSide, OHLCV,
};

/// Minimum series length before any structure can be read
pub const MIN_CANDLES: usize = 10;
/// Swings needed to establish an initial trend
pub const MIN_SWINGS: usize = 3;

// ============================================================
// TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureKind {
    /// Break of Structure: continuation
    Bos,
    /// Change of Character: reversal
    Choch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StructureEvent {
    pub kind: StructureKind,
    /// Bullish for higher highs / CHoCH up, Bearish for lower lows / CHoCH down
    pub direction: Direction,
    /// Price of the swing that produced the event
    pub price: f64,
    /// Previous same-kind swing that was broken
    pub broken_level: f64,
    /// Absolute candle index of the swing
    pub index: usize,
    pub timestamp: Option<i64>,
}

impl fmt::Display for StructureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StructureKind::Bos => "BOS",
            StructureKind::Choch => "CHoCH",
        };
        let arrow = if self.direction.is_bullish() { "up" } else { "down" };
        write!(f, "{kind} {arrow} @ {:.5}", self.price)
    }
}

/// Result of a market structure scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructureAnalysis {
    pub events: Vec<StructureEvent>,
    /// Trend after the last swing
    pub trend: Direction,
    pub swings: Vec<SwingPoint>,
}

/// Trend implied by the first three swings.
///
/// Low-High-Low is bullish on a higher low and bearish on a lower low;
/// High-Low-High is bullish on a higher high and bearish on a lower high.
/// Anything else, or equal prices, is Neutral.
pub fn initial_trend(swings: &[SwingPoint]) -> Direction {
    let [first, second, third] = match swings {
        [a, b, c, ..] => [a, b, c],
        _ => return Direction::Neutral,
    };
    let alternating = first.kind == third.kind && first.kind != second.kind;
    if !alternating {
        return Direction::Neutral;
    }
    if third.price > first.price {
        Direction::Bullish
    } else if third.price < first.price {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

/// Replay a chronological swing sequence into structure events and the final
/// trend.
///
/// While Neutral, a swing that is higher (lower) than the previous swing of
/// its kind establishes a Bullish (Bearish) trend without emitting an event.
/// A swing with no earlier swing of its kind never establishes a trend.
pub fn classify_swings(swings: &[SwingPoint]) -> (Vec<StructureEvent>, Direction) {
    if swings.len() < MIN_SWINGS {
        return (Vec::new(), Direction::Neutral);
    }

    let mut trend = initial_trend(swings);
    let mut events = Vec::new();
    let mut last_high: Option<f64> = None;
    let mut last_low: Option<f64> = None;

    for (i, swing) in swings.iter().enumerate() {
        let previous = match swing.kind {
            SwingKind::High => last_high,
            SwingKind::Low => last_low,
        };

        if i >= MIN_SWINGS {
            if let Some(prev) = previous {
                let event = |kind, direction| StructureEvent {
                    kind,
                    direction,
                    price: swing.price,
                    broken_level: prev,
                    index: swing.index,
                    timestamp: swing.timestamp,
                };

                match (trend, swing.kind) {
                    (Direction::Bullish, SwingKind::High) if swing.price > prev => {
                        events.push(event(StructureKind::Bos, Direction::Bullish));
                    },
                    (Direction::Bullish, SwingKind::Low) if swing.price < prev => {
                        events.push(event(StructureKind::Choch, Direction::Bearish));
                        trend = Direction::Bearish;
                    },
                    (Direction::Bearish, SwingKind::Low) if swing.price < prev => {
                        events.push(event(StructureKind::Bos, Direction::Bearish));
                    },
                    (Direction::Bearish, SwingKind::High) if swing.price > prev => {
                        events.push(event(StructureKind::Choch, Direction::Bullish));
                        trend = Direction::Bullish;
                    },
                    (Direction::Neutral, _) if swing.price > prev => trend = Direction::Bullish,
                    (Direction::Neutral, _) if swing.price < prev => trend = Direction::Bearish,
                    _ => {},
                }
            }
        }

        match swing.kind {
            SwingKind::High => last_high = Some(swing.price),
            SwingKind::Low => last_low = Some(swing.price),
        }
    }

    (events, trend)
}

// ============================================================
// CONFIG
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketStructureConfig {
    pub lookback: Period,
    /// Candles compared on each side of a swing
    pub swing_radius: Period,
}

impl Default for MarketStructureConfig {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(50),
            swing_radius: Period::new_const(SWING_RADIUS),
        }
    }
}

impl MarketStructureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.swing_radius.get() * 2 + 1 > self.lookback.get() {
            return Err(PatternError::InvalidConfig(format!(
                "market_structure.lookback ({}) cannot hold a swing of radius {}",
                self.lookback.get(),
                self.swing_radius.get()
            )));
        }
        Ok(())
    }
}

pub const MARKET_STRUCTURE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 50.0, (20.0, 150.0, 10.0), "Trailing candles scanned"),
    ParamMeta::period("swing_radius", 2.0, (1.0, 5.0, 1.0), "Candles on each side of a swing"),
];

impl ParameterizedDetector for MarketStructureConfig {
    fn param_meta() -> &'static [ParamMeta] {
        MARKET_STRUCTURE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let config = Self {
            lookback: get_period(params, "lookback", 50)?,
            swing_radius: get_period(params, "swing_radius", SWING_RADIUS)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn detector_name() -> &'static str {
        "market_structure"
    }
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct MarketStructureDetector {
    pub config: MarketStructureConfig,
    cache: SymbolCache<StructureAnalysis>,
}

impl MarketStructureDetector {
    pub fn new(config: MarketStructureConfig) -> Self {
        Self::with_cache(config, SymbolCache::default())
    }

    pub fn with_cache(config: MarketStructureConfig, cache: SymbolCache<StructureAnalysis>) -> Self {
        Self { config, cache }
    }

    /// Rescan and report whether the current trend supports a trade on `side`
    pub fn check_structure_aligned<T: OHLCV>(
        &mut self,
        candles: &[T],
        side: TradeSide,
        symbol: &str,
    ) -> bool {
        self.detect(candles, symbol).trend == side.direction()
    }

    /// Last `count` events from the cached scan, oldest first
    pub fn get_recent_structure_events(&self, symbol: &str, count: usize) -> Vec<StructureEvent> {
        self.last_result(symbol)
            .map(|analysis| {
                let start = analysis.events.len().saturating_sub(count);
                analysis.events[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn get_last_structure_event(&self, symbol: &str) -> Option<StructureEvent> {
        self.last_result(symbol)
            .and_then(|analysis| analysis.events.last().copied())
    }

    pub fn current_trend(&self, symbol: &str) -> Direction {
        self.last_result(symbol)
            .map(|analysis| analysis.trend)
            .unwrap_or_default()
    }
}

impl SmcDetector for MarketStructureDetector {
    type Output = StructureAnalysis;

    fn name(&self) -> &'static str {
        "market_structure"
    }

    fn scan<T: OHLCV>(&self, candles: &[T], symbol: &str) -> StructureAnalysis {
        if candles.len() < MIN_CANDLES {
            return StructureAnalysis::default();
        }

        let window = LookbackWindow::trailing(candles, self.config.lookback.get());
        let swings = merged_swings(&window, self.config.swing_radius.get());
        if swings.len() < MIN_SWINGS {
            return StructureAnalysis {
                swings,
                ..StructureAnalysis::default()
            };
        }

        let (events, trend) = classify_swings(&swings);
        for event in &events {
            tracing::trace!(symbol, %event, "structure event");
        }
        tracing::debug!(symbol, swings = swings.len(), events = events.len(), ?trend, "market structure scan");

        StructureAnalysis { events, trend, swings }
    }

    fn cache(&self) -> &SymbolCache<StructureAnalysis> {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut SymbolCache<StructureAnalysis> {
        &mut self.cache
    }

    fn validate_config(&self) -> Result<()> {
        self.config.validate()
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn hi(price: f64, index: usize) -> SwingPoint {
        SwingPoint::new(SwingKind::High, price, index)
    }

    fn lo(price: f64, index: usize) -> SwingPoint {
        SwingPoint::new(SwingKind::Low, price, index)
    }

    #[test]
    fn test_initial_trend_patterns() {
        assert_eq!(initial_trend(&[lo(1.09, 0), hi(1.10, 3), lo(1.095, 6)]), Direction::Bullish);
        assert_eq!(initial_trend(&[lo(1.09, 0), hi(1.10, 3), lo(1.085, 6)]), Direction::Bearish);
        assert_eq!(initial_trend(&[hi(1.10, 0), lo(1.09, 3), hi(1.11, 6)]), Direction::Bullish);
        assert_eq!(initial_trend(&[hi(1.10, 0), lo(1.09, 3), hi(1.095, 6)]), Direction::Bearish);
        assert_eq!(initial_trend(&[hi(1.10, 0), hi(1.11, 3), lo(1.09, 6)]), Direction::Neutral);
        assert_eq!(initial_trend(&[lo(1.09, 0), hi(1.10, 3)]), Direction::Neutral);
    }

    #[test]
    fn test_bos_keeps_bullish_trend() {
        let swings = [lo(1.0900, 0), hi(1.1000, 3), lo(1.0950, 6), hi(1.1050, 9)];
        let (events, trend) = classify_swings(&swings);
        assert_eq!(trend, Direction::Bullish);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, StructureKind::Bos);
        assert_eq!(events[0].direction, Direction::Bullish);
        assert_eq!(events[0].broken_level, 1.1000);
        assert_eq!(events[0].index, 9);
    }

    #[test]
    fn test_choch_flips_trend() {
        let swings = [
            lo(1.0900, 0),
            hi(1.1000, 3),
            lo(1.0950, 6),
            hi(1.1050, 9),
            lo(1.0940, 12), // below 1.0950: CHoCH down
            hi(1.1000, 15), // lower high: no event
            lo(1.0900, 18), // BOS down
            hi(1.1060, 21), // above 1.1000: CHoCH up
        ];
        let (events, trend) = classify_swings(&swings);
        let kinds: Vec<(StructureKind, Direction)> = events.iter().map(|e| (e.kind, e.direction)).collect();
        assert_eq!(
            kinds,
            vec![
                (StructureKind::Bos, Direction::Bullish),
                (StructureKind::Choch, Direction::Bearish),
                (StructureKind::Bos, Direction::Bearish),
                (StructureKind::Choch, Direction::Bullish),
            ]
        );
        assert_eq!(trend, Direction::Bullish);
    }

    #[test]
    fn test_neutral_establishes_trend_without_event() {
        // High, High, Low: no initial trend
        let swings = [hi(1.1000, 0), hi(1.1010, 3), lo(1.0950, 6), lo(1.0940, 9), hi(1.0990, 12)];
        let (events, trend) = classify_swings(&swings);
        // lower low establishes Bearish, then a lower high does nothing
        assert!(events.is_empty());
        assert_eq!(trend, Direction::Bearish);
    }

    #[test]
    fn test_too_few_swings() {
        let (events, trend) = classify_swings(&[lo(1.0, 0), hi(1.1, 3)]);
        assert!(events.is_empty());
        assert_eq!(trend, Direction::Neutral);
    }

    fn zigzag_up() -> Vec<Candle> {
        (0..40)
            .map(|i| {
                let wave = [0.0, 0.0008, 0.0016, 0.0008, 0.0][i % 5];
                let base = 1.1000 + i as f64 * 0.0004 + wave;
                Candle::new(base, base + 0.0005, base - 0.0005, base + 0.0002)
            })
            .collect()
    }

    #[test]
    fn test_detector_on_zigzag() {
        let mut detector = MarketStructureDetector::default();
        let bars = zigzag_up();

        assert!(detector.check_structure_aligned(&bars, TradeSide::Buy, "EURUSD"));
        assert!(!detector.check_structure_aligned(&bars, TradeSide::Sell, "EURUSD"));

        let last = detector.get_last_structure_event("EURUSD").unwrap();
        assert_eq!(last.kind, StructureKind::Bos);
        assert!(detector.get_recent_structure_events("EURUSD", 2).len() <= 2);
        assert_eq!(detector.current_trend("EURUSD"), Direction::Bullish);
        assert!(detector.get_last_structure_event("GBPUSD").is_none());
    }

    #[test]
    fn test_short_series_is_neutral() {
        let detector = MarketStructureDetector::default();
        let bars: Vec<Candle> = zigzag_up().into_iter().take(MIN_CANDLES - 1).collect();
        let analysis = detector.scan(&bars, "EURUSD");
        assert!(analysis.events.is_empty());
        assert_eq!(analysis.trend, Direction::Neutral);
    }

    #[test]
    fn test_invalid_radius_rejected() {
        let config = MarketStructureConfig {
            lookback: Period::new_const(4),
            swing_radius: Period::new_const(2),
        };
        assert!(config.validate().is_err());
    }
}
