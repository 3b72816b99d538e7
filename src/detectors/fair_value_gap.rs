//! Fair value gap detection
//!
//! A gap is a 3-candle imbalance where the first and third candles' ranges do
//! not overlap. Later candles that trade back into the gap fill it; a fully
//! covered gap is terminal.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, pip_size, LookbackWindow};
use crate::{
    cache::SymbolCache,
    params::{get_period, get_pips, ParamMeta, ParameterizedDetector},
    Direction, OHLCVExt, PatternError, Period, Result, SmcDetector, OHLCV,
};

/// Minimum series length before any gap can be detected
pub const MIN_CANDLES: usize = 10;

// ============================================================
// TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FvgKind {
    Bullish,
    Bearish,
}

impl FvgKind {
    pub fn direction(self) -> Direction {
        match self {
            FvgKind::Bullish => Direction::Bullish,
            FvgKind::Bearish => Direction::Bearish,
        }
    }
}

/// Fill progress of a gap. `Filled` is terminal and the percentage never
/// decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub enum FillState {
    #[default]
    Unfilled,
    /// Percent of the gap covered, 0 < percent < 100
    Partial { percent: f64 },
    Filled { at_index: usize },
}

impl FillState {
    /// Percent of the gap covered so far
    pub fn percent(&self) -> f64 {
        match self {
            FillState::Unfilled => 0.0,
            FillState::Partial { percent } => *percent,
            FillState::Filled { .. } => 100.0,
        }
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        matches!(self, FillState::Filled { .. })
    }

    /// Record a candle that covered `percent` of the gap. Lower coverage than
    /// already recorded is ignored.
    pub fn advance(&mut self, percent: f64, at_index: usize) {
        if self.is_filled() || percent.is_nan() || percent <= self.percent() {
            return;
        }
        *self = if percent >= 100.0 {
            FillState::Filled { at_index }
        } else {
            FillState::Partial { percent }
        };
    }
}

/// A detected fair value gap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FairValueGap {
    pub kind: FvgKind,
    pub top: f64,
    pub bottom: f64,
    pub size_pips: f64,
    /// 0..=100, fixed at detection time
    pub strength: f64,
    /// Absolute index of the third candle, where the gap is confirmed
    pub index: usize,
    pub timestamp: Option<i64>,
    pub fill: FillState,
}

/// Entry zone, fill target and stop for trading a gap
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FillTargets {
    pub entry_low: f64,
    pub entry_high: f64,
    pub target: f64,
    pub stop_loss: f64,
}

impl FairValueGap {
    #[inline]
    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.top - self.bottom
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.fill.is_filled()
    }

    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }

    /// Percent of the gap a candle covers. Bullish gaps are filled from the
    /// bottom up, bearish gaps from the top down.
    pub fn coverage<T: OHLCV>(&self, candle: &T) -> f64 {
        let size = self.size();
        if size <= 0.0 || !candle.overlaps(self.bottom, self.top) {
            return 0.0;
        }
        let covered = match self.kind {
            FvgKind::Bullish => candle.high().min(self.top) - self.bottom,
            FvgKind::Bearish => self.top - candle.low().max(self.bottom),
        };
        (covered / size * 100.0).clamp(0.0, 100.0)
    }

    /// Apply `later` candles (starting at absolute index `first_index`) to
    /// the fill state, stopping once the gap is filled.
    pub fn update_fill<T: OHLCV>(&mut self, later: &[T], first_index: usize) {
        for (offset, candle) in later.iter().enumerate() {
            if self.fill.is_filled() {
                break;
            }
            let pct = self.coverage(candle);
            self.fill.advance(pct, first_index + offset);
        }
    }

    /// Entry between the near boundary and the midpoint, target at the far
    /// boundary, stop half a gap beyond the entry boundary.
    pub fn fill_targets(&self) -> FillTargets {
        let mid = self.midpoint();
        let half = self.size() * 0.5;
        match self.kind {
            FvgKind::Bullish => FillTargets {
                entry_low: self.bottom,
                entry_high: mid,
                target: self.top,
                stop_loss: self.bottom - half,
            },
            FvgKind::Bearish => FillTargets {
                entry_low: mid,
                entry_high: self.top,
                target: self.bottom,
                stop_loss: self.top + half,
            },
        }
    }
}

impl fmt::Display for FairValueGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            FvgKind::Bullish => "Bullish FVG",
            FvgKind::Bearish => "Bearish FVG",
        };
        write!(
            f,
            "{label} {:.5}-{:.5} {:.1}p ({:.0}%)",
            self.bottom,
            self.top,
            self.size_pips,
            self.fill.percent()
        )
    }
}

// ============================================================
// CONFIG
// ============================================================

/// Fair value gap detector parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairValueGapConfig {
    pub lookback: Period,
    /// Gaps must be strictly larger than this, in pips
    pub min_gap_pips: f64,
}

impl Default for FairValueGapConfig {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(50),
            min_gap_pips: 5.0,
        }
    }
}

impl FairValueGapConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_gap_pips.is_finite() || self.min_gap_pips < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "fair_value_gap.min_gap_pips must be a non-negative number, got {}",
                self.min_gap_pips
            )));
        }
        Ok(())
    }
}

pub const FAIR_VALUE_GAP_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 50.0, (20.0, 150.0, 10.0), "Trailing candles scanned"),
    ParamMeta::pips("min_gap_pips", 5.0, (1.0, 20.0, 1.0), "Minimum gap size in pips"),
];

impl ParameterizedDetector for FairValueGapConfig {
    fn param_meta() -> &'static [ParamMeta] {
        FAIR_VALUE_GAP_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let config = Self {
            lookback: get_period(params, "lookback", 50)?,
            min_gap_pips: get_pips(params, "min_gap_pips", 5.0)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn detector_name() -> &'static str {
        "fair_value_gap"
    }
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct FairValueGapDetector {
    pub config: FairValueGapConfig,
    cache: SymbolCache<Vec<FairValueGap>>,
}

impl FairValueGapDetector {
    pub fn new(config: FairValueGapConfig) -> Self {
        Self::with_cache(config, SymbolCache::default())
    }

    pub fn with_cache(config: FairValueGapConfig, cache: SymbolCache<Vec<FairValueGap>>) -> Self {
        Self { config, cache }
    }

    /// Gaps from the last scan that are not completely filled, strongest first
    pub fn get_unfilled(&self, symbol: &str) -> Vec<FairValueGap> {
        let mut open: Vec<FairValueGap> = self
            .last_result(symbol)
            .map(|gaps| gaps.iter().filter(|g| !g.is_filled()).cloned().collect())
            .unwrap_or_default();
        open.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        open
    }

    /// Rescan and report whether `price` sits inside any unfilled gap
    pub fn is_price_in_fvg<T: OHLCV>(&mut self, candles: &[T], price: f64, symbol: &str) -> bool {
        self.detect(candles, symbol);
        self.get_unfilled(symbol).iter().any(|g| g.contains(price))
    }

    /// Rescan, then return the unfilled gap whose midpoint is closest to
    /// `price`, optionally restricted to one direction.
    pub fn get_nearest<T: OHLCV>(
        &mut self,
        candles: &[T],
        price: f64,
        symbol: &str,
        direction: Option<Direction>,
    ) -> Option<FairValueGap> {
        self.detect(candles, symbol);
        self.get_unfilled(symbol)
            .into_iter()
            .filter(|g| direction.map_or(true, |d| g.direction() == d))
            .min_by(|a, b| {
                (a.midpoint() - price)
                    .abs()
                    .total_cmp(&(b.midpoint() - price).abs())
            })
    }

    /// See [`FairValueGap::fill_targets`]
    pub fn get_fill_targets(fvg: &FairValueGap) -> FillTargets {
        fvg.fill_targets()
    }

    fn score<T: OHLCV>(size_pips: f64, first: &T, middle: &T, third: &T) -> f64 {
        let size = match size_pips {
            p if p >= 15.0 => 30.0,
            p if p >= 10.0 => 20.0,
            p if p >= 7.0 => 10.0,
            _ => 0.0,
        };
        let momentum = match middle.body_ratio() {
            Some(r) if r > 0.7 => 20.0,
            Some(r) if r > 0.5 => 10.0,
            _ => 0.0,
        };
        let (r1, r3) = (first.range(), third.range());
        let larger = r1.max(r3);
        let balance = if larger > 0.0 && r1.min(r3) / larger >= 0.7 {
            10.0
        } else {
            0.0
        };
        clamp_score(50.0 + size + momentum + balance)
    }
}

impl SmcDetector for FairValueGapDetector {
    type Output = Vec<FairValueGap>;

    fn name(&self) -> &'static str {
        "fair_value_gap"
    }

    fn scan<T: OHLCV>(&self, candles: &[T], symbol: &str) -> Vec<FairValueGap> {
        if candles.len() < MIN_CANDLES {
            return Vec::new();
        }

        let pip = pip_size(symbol);
        let window = LookbackWindow::trailing(candles, self.config.lookback.get());
        let bars = window.bars();
        let mut gaps = Vec::new();

        for (pos, three) in bars.windows(3).enumerate().map(|(p, w)| (p + 2, w)) {
            let (first, middle, third) = (&three[0], &three[1], &three[2]);

            let (kind, top, bottom) = if first.low() > third.high() {
                (FvgKind::Bullish, first.low(), third.high())
            } else if first.high() < third.low() {
                (FvgKind::Bearish, third.low(), first.high())
            } else {
                continue;
            };

            let size_pips = (top - bottom) / pip;
            if size_pips <= self.config.min_gap_pips {
                continue;
            }

            let mut gap = FairValueGap {
                kind,
                top,
                bottom,
                size_pips,
                strength: Self::score(size_pips, first, middle, third),
                index: window.absolute(pos),
                timestamp: third.timestamp(),
                fill: FillState::Unfilled,
            };
            gap.update_fill(window.after(pos), window.absolute(pos + 1));
            tracing::trace!(symbol, %gap, "fair value gap");
            gaps.push(gap);
        }

        tracing::debug!(
            symbol,
            found = gaps.len(),
            unfilled = gaps.iter().filter(|g| !g.is_filled()).count(),
            "fair value gap scan"
        );
        gaps
    }

    fn cache(&self) -> &SymbolCache<Vec<FairValueGap>> {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut SymbolCache<Vec<FairValueGap>> {
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

    /// Overlapping flat candles around `price`: no gaps
    fn flat(n: usize, price: f64) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle::new(price, price + 0.0002, price - 0.0002, price + 0.0001))
            .collect()
    }

    /// Bullish gap between 1.1050 and 1.1020 confirmed at index 10
    fn gap_series() -> Vec<Candle> {
        let mut bars = flat(8, 1.1054);
        bars.push(Candle::new(1.1060, 1.1062, 1.1050, 1.1052));
        bars.push(Candle::new(1.1052, 1.1053, 1.1021, 1.1022));
        bars.push(Candle::new(1.1020, 1.1020, 1.1008, 1.1010));
        bars
    }

    #[test]
    fn test_fill_state_is_monotonic() {
        let mut fill = FillState::Unfilled;
        fill.advance(40.0, 3);
        fill.advance(20.0, 4);
        assert_eq!(fill, FillState::Partial { percent: 40.0 });
        fill.advance(100.0, 5);
        assert_eq!(fill, FillState::Filled { at_index: 5 });
        fill.advance(50.0, 6);
        assert!(fill.is_filled());
    }

    #[test]
    fn test_gap_bounds_and_size() {
        let detector = FairValueGapDetector::default();
        let gaps = detector.scan(&gap_series(), "EURUSD");
        assert_eq!(gaps.len(), 1);

        let gap = &gaps[0];
        assert_eq!(gap.kind, FvgKind::Bullish);
        assert_eq!(gap.top, 1.1050);
        assert_eq!(gap.bottom, 1.1020);
        assert!((gap.size() - 0.0030).abs() < 1e-9);
        assert!((gap.size_pips - 30.0).abs() < 1e-6);
        assert_eq!(gap.index, 10);
        assert_eq!(gap.fill, FillState::Unfilled);
    }

    #[test]
    fn test_gap_too_small() {
        let detector = FairValueGapDetector::new(FairValueGapConfig {
            min_gap_pips: 31.0,
            ..Default::default()
        });
        assert!(detector.scan(&gap_series(), "EURUSD").is_empty());
    }

    #[test]
    fn test_partial_then_complete_fill() {
        let detector = FairValueGapDetector::default();
        let mut bars = gap_series();
        bars.push(Candle::new(1.1010, 1.1035, 1.1009, 1.1030));
        let gaps = detector.scan(&bars, "EURUSD");
        match gaps[0].fill {
            FillState::Partial { percent } => assert!((percent - 50.0).abs() < 1e-6),
            other => panic!("expected partial fill, got {other:?}"),
        }

        bars.push(Candle::new(1.1030, 1.1055, 1.1028, 1.1050));
        let gaps = detector.scan(&bars, "EURUSD");
        let gap = gaps.iter().find(|g| g.index == 10).unwrap();
        assert_eq!(gap.fill, FillState::Filled { at_index: 12 });
    }

    #[test]
    fn test_fill_targets() {
        let detector = FairValueGapDetector::default();
        let gaps = detector.scan(&gap_series(), "EURUSD");
        let t = FairValueGapDetector::get_fill_targets(&gaps[0]);
        assert_eq!(t.entry_low, 1.1020);
        assert!((t.entry_high - 1.1035).abs() < 1e-9);
        assert_eq!(t.target, 1.1050);
        assert!((t.stop_loss - 1.1005).abs() < 1e-9);
    }

    /// Bearish gap between 1.1000 and 1.1030 confirmed at index 10
    fn bearish_gap_series() -> Vec<Candle> {
        let mut bars = flat(8, 1.0996);
        bars.push(Candle::new(1.0990, 1.1000, 1.0988, 1.0998));
        bars.push(Candle::new(1.0998, 1.1029, 1.0997, 1.1028));
        bars.push(Candle::new(1.1030, 1.1042, 1.1030, 1.1040));
        bars
    }

    #[test]
    fn test_bearish_gap_fills_from_the_top() {
        let detector = FairValueGapDetector::default();
        let mut bars = bearish_gap_series();
        let gaps = detector.scan(&bars, "EURUSD");
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, FvgKind::Bearish);
        assert_eq!(gaps[0].direction(), Direction::Bearish);
        assert_eq!((gaps[0].top, gaps[0].bottom), (1.1030, 1.1000));

        // dips halfway into the gap from above
        bars.push(Candle::new(1.1040, 1.1041, 1.1015, 1.1020));
        let gaps = detector.scan(&bars, "EURUSD");
        match gaps[0].fill {
            FillState::Partial { percent } => assert!((percent - 50.0).abs() < 1e-6),
            other => panic!("expected partial fill, got {other:?}"),
        }

        bars.push(Candle::new(1.1020, 1.1031, 1.0995, 1.0998));
        let gaps = detector.scan(&bars, "EURUSD");
        let gap = gaps.iter().find(|g| g.index == 10).unwrap();
        assert_eq!(gap.fill, FillState::Filled { at_index: 12 });
    }

    #[test]
    fn test_bearish_fill_targets() {
        let detector = FairValueGapDetector::default();
        let gaps = detector.scan(&bearish_gap_series(), "EURUSD");
        let t = FairValueGapDetector::get_fill_targets(&gaps[0]);
        assert!((t.entry_low - 1.1015).abs() < 1e-9);
        assert_eq!(t.entry_high, 1.1030);
        assert_eq!(t.target, 1.1000);
        assert!((t.stop_loss - 1.1045).abs() < 1e-9);
    }

    #[test]
    fn test_price_queries() {
        let mut detector = FairValueGapDetector::default();
        let bars = gap_series();
        assert!(detector.is_price_in_fvg(&bars, 1.1030, "EURUSD"));
        assert!(!detector.is_price_in_fvg(&bars, 1.1060, "EURUSD"));
        assert_eq!(detector.get_unfilled("EURUSD").len(), 1);
        assert!(detector
            .get_nearest(&bars, 1.1000, "EURUSD", Some(Direction::Bearish))
            .is_none());
        assert!(detector.get_nearest(&bars, 1.1000, "EURUSD", None).is_some());
    }

    #[test]
    fn test_strength_is_clamped() {
        let detector = FairValueGapDetector::default();
        let gaps = detector.scan(&gap_series(), "EURUSD");
        // 30 pips (+30) and a strong middle candle (+20) on base 50
        assert!(gaps[0].strength >= 80.0 && gaps[0].strength <= 100.0);
    }
}
