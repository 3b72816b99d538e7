//! Liquidity sweep (stop hunt) detection
//!
//! Swing highs and lows that sit within a few pips of each other form
//! "equal highs/lows" pools. A candle that wicks through such a level and
//! closes back on the near side, rejecting at least half its range, is a
//! sweep.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, pip_size, swing_points, LookbackWindow, SwingKind, SwingPoint, SWING_RADIUS};
use crate::{
    cache::SymbolCache,
    params::{get_period, get_pips, ParamMeta, ParameterizedDetector},
    Direction, OHLCVExt, PatternError, Period, Result, SmcDetector, OHLCV,
};

/// Minimum series length before any sweep can be detected
pub const MIN_CANDLES: usize = 10;
/// Minimum share of the candle range rejected back from the extreme
pub const MIN_REJECTION: f64 = 0.5;

// ============================================================
// TYPES
// ============================================================

/// Equal highs/lows pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiquidityLevel {
    pub kind: SwingKind,
    /// Highest member for highs, lowest for lows
    pub price: f64,
    /// Number of swings in the cluster (always >= 2)
    pub members: usize,
    /// Absolute index of the earliest member swing
    pub first_index: usize,
    pub last_index: usize,
}

/// Which side of the book was swept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepKind {
    /// Wick above equal highs, close back below
    HighSweep,
    /// Wick below equal lows, close back above
    LowSweep,
}

impl SweepKind {
    /// Expected move after the sweep
    pub fn direction(self) -> Direction {
        match self {
            SweepKind::HighSweep => Direction::Bearish,
            SweepKind::LowSweep => Direction::Bullish,
        }
    }
}

/// A point-in-time sweep event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquiditySweep {
    pub kind: SweepKind,
    /// Liquidity level that was taken
    pub level: f64,
    /// Extreme reached past the level (high for high sweeps, low for lows)
    pub sweep_price: f64,
    pub close: f64,
    pub rejection_ratio: f64,
    /// 0..=100
    pub strength: f64,
    /// Absolute index of the sweeping candle
    pub index: usize,
    pub timestamp: Option<i64>,
}

impl LiquiditySweep {
    #[inline]
    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }
}

impl fmt::Display for LiquiditySweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            SweepKind::HighSweep => "BSL sweep",
            SweepKind::LowSweep => "SSL sweep",
        };
        write!(f, "{label} @ {:.5} ({:.0})", self.level, self.strength)
    }
}

/// Greedy single-pass clustering of swing prices.
///
/// Each swing joins the first cluster whose anchor (first member) lies within
/// `tolerance`, otherwise it starts a new cluster. Clusters with a single
/// member are dropped.
pub fn cluster_levels(swings: &[SwingPoint], tolerance: f64) -> Vec<LiquidityLevel> {
    struct Cluster {
        anchor: f64,
        level: LiquidityLevel,
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for swing in swings {
        match clusters
            .iter_mut()
            .find(|c| c.level.kind == swing.kind && (swing.price - c.anchor).abs() <= tolerance)
        {
            Some(cluster) => {
                let level = &mut cluster.level;
                level.members += 1;
                level.price = match swing.kind {
                    SwingKind::High => level.price.max(swing.price),
                    SwingKind::Low => level.price.min(swing.price),
                };
                level.first_index = level.first_index.min(swing.index);
                level.last_index = level.last_index.max(swing.index);
            },
            None => clusters.push(Cluster {
                anchor: swing.price,
                level: LiquidityLevel {
                    kind: swing.kind,
                    price: swing.price,
                    members: 1,
                    first_index: swing.index,
                    last_index: swing.index,
                },
            }),
        }
    }

    clusters
        .into_iter()
        .map(|c| c.level)
        .filter(|level| level.members >= 2)
        .collect()
}

// ============================================================
// CONFIG
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquiditySweepConfig {
    pub lookback: Period,
    /// Swings within this many pips are treated as equal
    pub tolerance_pips: f64,
}

impl Default for LiquiditySweepConfig {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(50),
            tolerance_pips: 3.0,
        }
    }
}

impl LiquiditySweepConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance_pips.is_finite() || self.tolerance_pips < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "liquidity_sweep.tolerance_pips must be a non-negative number, got {}",
                self.tolerance_pips
            )));
        }
        Ok(())
    }
}

pub const LIQUIDITY_SWEEP_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 50.0, (20.0, 150.0, 10.0), "Trailing candles scanned"),
    ParamMeta::pips("tolerance_pips", 3.0, (1.0, 10.0, 1.0), "Equal-level clustering tolerance in pips"),
];

impl ParameterizedDetector for LiquiditySweepConfig {
    fn param_meta() -> &'static [ParamMeta] {
        LIQUIDITY_SWEEP_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let config = Self {
            lookback: get_period(params, "lookback", 50)?,
            tolerance_pips: get_pips(params, "tolerance_pips", 3.0)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn detector_name() -> &'static str {
        "liquidity_sweep"
    }
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct LiquiditySweepDetector {
    pub config: LiquiditySweepConfig,
    cache: SymbolCache<Vec<LiquiditySweep>>,
}

impl LiquiditySweepDetector {
    pub fn new(config: LiquiditySweepConfig) -> Self {
        Self::with_cache(config, SymbolCache::default())
    }

    pub fn with_cache(config: LiquiditySweepConfig, cache: SymbolCache<Vec<LiquiditySweep>>) -> Self {
        Self { config, cache }
    }

    /// Equal-high and equal-low levels in the lookback window
    pub fn liquidity_levels<T: OHLCV>(&self, candles: &[T], symbol: &str) -> Vec<LiquidityLevel> {
        let window = LookbackWindow::trailing(candles, self.config.lookback.get());
        self.levels_in(&window, pip_size(symbol))
    }

    /// Rescan and report whether a sweep occurred in the last
    /// `lookback_candles` candles
    pub fn has_recent_sweep<T: OHLCV>(
        &mut self,
        candles: &[T],
        symbol: &str,
        lookback_candles: usize,
    ) -> bool {
        let first_recent = candles.len().saturating_sub(lookback_candles);
        self.detect(candles, symbol)
            .iter()
            .any(|s| s.index >= first_recent)
    }

    /// Rescan and return the strongest sweep whose level is within
    /// `tolerance_pips` of `price`
    pub fn get_sweep_near_price<T: OHLCV>(
        &mut self,
        candles: &[T],
        price: f64,
        symbol: &str,
        tolerance_pips: f64,
    ) -> Option<LiquiditySweep> {
        let tolerance = tolerance_pips * pip_size(symbol);
        self.detect(candles, symbol)
            .into_iter()
            .filter(|s| (s.level - price).abs() <= tolerance)
            .max_by(|a, b| a.strength.total_cmp(&b.strength))
    }

    fn levels_in<T: OHLCV>(&self, window: &LookbackWindow<'_, T>, pip: f64) -> Vec<LiquidityLevel> {
        let tolerance = self.config.tolerance_pips * pip;
        let mut levels = cluster_levels(&swing_points(window, SwingKind::High, SWING_RADIUS), tolerance);
        levels.extend(cluster_levels(&swing_points(window, SwingKind::Low, SWING_RADIUS), tolerance));
        levels
    }

    /// Sweep of `level` by `candle`, if it wicks through and rejects
    fn sweep_of<T: OHLCV>(level: &LiquidityLevel, candle: &T, index: usize) -> Option<LiquiditySweep> {
        let range = candle.range();
        if range <= 0.0 {
            return None;
        }

        let (kind, sweep_price, rejection, depth) = match level.kind {
            SwingKind::High if candle.high() > level.price && candle.close() < level.price => (
                SweepKind::HighSweep,
                candle.high(),
                (candle.high() - candle.close()) / range,
                candle.high() - level.price,
            ),
            SwingKind::Low if candle.low() < level.price && candle.close() > level.price => (
                SweepKind::LowSweep,
                candle.low(),
                (candle.close() - candle.low()) / range,
                level.price - candle.low(),
            ),
            _ => return None,
        };
        if rejection < MIN_REJECTION {
            return None;
        }

        let rejection_score = ((rejection - MIN_REJECTION) * 60.0).min(30.0);
        let depth_score = (depth / range * 40.0).min(20.0);
        let body_score = (1.0 - candle.body() / range) * 20.0;

        Some(LiquiditySweep {
            kind,
            level: level.price,
            sweep_price,
            close: candle.close(),
            rejection_ratio: rejection,
            strength: clamp_score(50.0 + rejection_score + depth_score + body_score),
            index,
            timestamp: candle.timestamp(),
        })
    }
}

impl SmcDetector for LiquiditySweepDetector {
    type Output = Vec<LiquiditySweep>;

    fn name(&self) -> &'static str {
        "liquidity_sweep"
    }

    fn scan<T: OHLCV>(&self, candles: &[T], symbol: &str) -> Vec<LiquiditySweep> {
        if candles.len() < MIN_CANDLES {
            return Vec::new();
        }

        let window = LookbackWindow::trailing(candles, self.config.lookback.get());
        let levels = self.levels_in(&window, pip_size(symbol));
        if levels.is_empty() {
            return Vec::new();
        }

        let mut sweeps = Vec::new();
        for (pos, candle) in window.bars().iter().enumerate() {
            let index = window.absolute(pos);
            // a pool has to exist before it can be swept
            for level in levels.iter().filter(|l| index > l.first_index) {
                if let Some(sweep) = Self::sweep_of(level, candle, index) {
                    tracing::trace!(symbol, %sweep, "liquidity sweep");
                    sweeps.push(sweep);
                }
            }
        }

        tracing::debug!(symbol, levels = levels.len(), found = sweeps.len(), "liquidity sweep scan");
        sweeps
    }

    fn cache(&self) -> &SymbolCache<Vec<LiquiditySweep>> {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut SymbolCache<Vec<LiquiditySweep>> {
        &mut self.cache
    }

    fn validate_config(&self) -> Result<()> {
        self.config.validate()
    }
}

// ============================================================
// TESTS
// ============================================================
