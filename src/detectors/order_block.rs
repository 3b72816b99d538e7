//! Order block detection
//!
//! An order block is the last opposite-colored candle before a directional
//! impulse of at least three same-colored candles. Its high-low range is the
//! zone; later closes through the far side mitigate it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, pip_size, LookbackWindow};
use crate::{
    cache::SymbolCache,
    params::{get_period, get_pips, ParamMeta, ParameterizedDetector},
    Direction, OHLCVExt, PatternError, Period, Result, SmcDetector, OHLCV,
};

/// Minimum series length before any order block can be detected
pub const MIN_CANDLES: usize = 10;
/// First window position that may close an impulse
const FIRST_IMPULSE_END: usize = 5;
/// Candles searched backwards from the impulse start for the block candle
const MAX_BLOCK_DISTANCE: usize = 10;
/// Trailing candles examined for mitigation and touches
const MITIGATION_WINDOW: usize = 20;
/// Impulse size (pips) that earns the full size score
const FULL_SIZE_PIPS: f64 = 30.0;
/// Body/range ratio above which an impulse candle counts as clean
const CLEAN_BODY_RATIO: f64 = 0.7;

// ============================================================
// TYPES
// ============================================================

/// Demand blocks precede bullish impulses, supply blocks bearish ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderBlockKind {
    Demand,
    Supply,
}

impl OrderBlockKind {
    pub fn direction(self) -> Direction {
        match self {
            OrderBlockKind::Demand => Direction::Bullish,
            OrderBlockKind::Supply => Direction::Bearish,
        }
    }
}

/// Mitigation state. `Mitigated` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Mitigation {
    #[default]
    Unmitigated,
    Mitigated { at_index: usize },
}

impl Mitigation {
    /// Record a mitigating close. Has no effect once mitigated.
    pub fn mitigate(&mut self, at_index: usize) {
        if let Mitigation::Unmitigated = self {
            *self = Mitigation::Mitigated { at_index };
        }
    }

    #[inline]
    pub fn is_mitigated(&self) -> bool {
        matches!(self, Mitigation::Mitigated { .. })
    }
}

/// A detected order block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBlock {
    pub kind: OrderBlockKind,
    pub top: f64,
    pub bottom: f64,
    /// 0..=100, fixed at detection time
    pub strength: f64,
    /// Absolute index of the block candle
    pub index: usize,
    pub timestamp: Option<i64>,
    /// Candles in the impulse that followed the block
    pub impulse_candles: usize,
    pub impulse_pips: f64,
    pub mitigation: Mitigation,
    /// Later candles whose range overlapped the zone
    pub touches: usize,
}

impl OrderBlock {
    #[inline]
    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    #[inline]
    pub fn is_mitigated(&self) -> bool {
        self.mitigation.is_mitigated()
    }

    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }

    /// Walk `later` candles (starting at absolute index `first_index`),
    /// recounting touches and applying the mitigation rule. Re-running on
    /// the same candles leaves the block unchanged.
    pub fn update_mitigation<T: OHLCV>(&mut self, later: &[T], first_index: usize) {
        self.touches = 0;
        for (offset, candle) in later.iter().enumerate() {
            if candle.overlaps(self.bottom, self.top) {
                self.touches += 1;
            }
            if self.mitigation.is_mitigated() {
                continue;
            }
            let broken = match self.kind {
                OrderBlockKind::Demand => candle.close() < self.bottom,
                OrderBlockKind::Supply => candle.close() > self.top,
            };
            if broken {
                self.mitigation.mitigate(first_index + offset);
            }
        }
    }
}

impl fmt::Display for OrderBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            OrderBlockKind::Demand => "Bullish OB",
            OrderBlockKind::Supply => "Bearish OB",
        };
        write!(f, "{label} {:.5}-{:.5} ({:.0})", self.bottom, self.top, self.strength)?;
        if self.is_mitigated() {
            write!(f, " mitigated")?;
        }
        Ok(())
    }
}

// ============================================================
// CONFIG
// ============================================================

/// Order block detector parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBlockConfig {
    /// Trailing candles scanned
    pub lookback: Period,
    /// Minimum 3-candle impulse range, in pips
    pub min_impulse_pips: f64,
}

impl Default for OrderBlockConfig {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(50),
            min_impulse_pips: 15.0,
        }
    }
}

impl OrderBlockConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_impulse_pips.is_finite() || self.min_impulse_pips < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "order_block.min_impulse_pips must be a non-negative number, got {}",
                self.min_impulse_pips
            )));
        }
        Ok(())
    }
}

pub const ORDER_BLOCK_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 50.0, (20.0, 150.0, 10.0), "Trailing candles scanned"),
    ParamMeta::pips("min_impulse_pips", 15.0, (5.0, 40.0, 5.0), "Minimum impulse range in pips"),
];

impl ParameterizedDetector for OrderBlockConfig {
    fn param_meta() -> &'static [ParamMeta] {
        ORDER_BLOCK_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let config = Self {
            lookback: get_period(params, "lookback", 50)?,
            min_impulse_pips: get_pips(params, "min_impulse_pips", 15.0)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn detector_name() -> &'static str {
        "order_block"
    }
}

// ============================================================
// DETECTOR
// ============================================================

/// Scans for order blocks and caches the last result per symbol
#[derive(Debug, Clone, Default)]
pub struct OrderBlockDetector {
    pub config: OrderBlockConfig,
    cache: SymbolCache<Vec<OrderBlock>>,
}

struct Impulse {
    start: usize,
    candles: usize,
    pips: f64,
    clean: usize,
}

impl OrderBlockDetector {
    pub fn new(config: OrderBlockConfig) -> Self {
        Self::with_cache(config, SymbolCache::default())
    }

    pub fn with_cache(config: OrderBlockConfig, cache: SymbolCache<Vec<OrderBlock>>) -> Self {
        Self { config, cache }
    }

    /// Unmitigated blocks from the last scan, strongest first
    pub fn get_active(&self, symbol: &str) -> Vec<OrderBlock> {
        let mut active: Vec<OrderBlock> = self
            .last_result(symbol)
            .map(|blocks| blocks.iter().filter(|ob| !ob.is_mitigated()).cloned().collect())
            .unwrap_or_default();
        active.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        active
    }

    /// Rescan, then return the active block whose midpoint is closest to
    /// `price`, optionally restricted to one direction.
    pub fn get_nearest<T: OHLCV>(
        &mut self,
        candles: &[T],
        price: f64,
        symbol: &str,
        direction: Option<Direction>,
    ) -> Option<OrderBlock> {
        self.detect(candles, symbol);
        self.get_active(symbol)
            .into_iter()
            .filter(|ob| direction.map_or(true, |d| ob.direction() == d))
            .min_by(|a, b| {
                (a.midpoint() - price)
                    .abs()
                    .total_cmp(&(b.midpoint() - price).abs())
            })
    }

    /// Impulse closing at window position `end`, if the three candles ending
    /// there qualify. The impulse is extended forward while candles keep the
    /// same color.
    fn impulse_at<T: OHLCV>(
        &self,
        window: &LookbackWindow<'_, T>,
        end: usize,
        pip: f64,
    ) -> Option<(OrderBlockKind, Impulse)> {
        let start = end.checked_sub(2)?;
        let three = window.slice(start, end + 1);

        let kind = if three.iter().all(|c| c.is_bullish()) {
            OrderBlockKind::Demand
        } else if three.iter().all(|c| c.is_bearish()) {
            OrderBlockKind::Supply
        } else {
            return None;
        };

        let pips = span(three) / pip;
        if pips <= self.config.min_impulse_pips {
            return None;
        }

        let same_color = |c: &T| match kind {
            OrderBlockKind::Demand => c.is_bullish(),
            OrderBlockKind::Supply => c.is_bearish(),
        };
        let mut stop = end + 1;
        while window.get(stop).is_some_and(|c| same_color(c)) {
            stop += 1;
        }
        let run = window.slice(start, stop);
        let clean = run
            .iter()
            .filter(|c| c.body_ratio().is_some_and(|r| r > CLEAN_BODY_RATIO))
            .count();

        Some((
            kind,
            Impulse {
                start,
                candles: run.len(),
                pips: span(run) / pip,
                clean,
            },
        ))
    }

    fn score(impulse: &Impulse) -> f64 {
        let size = (impulse.pips / FULL_SIZE_PIPS).min(1.0) * 25.0;
        let count = match impulse.candles {
            n if n >= 5 => 15.0,
            4 => 10.0,
            _ => 5.0,
        };
        let clean = if impulse.candles > 0 {
            impulse.clean as f64 / impulse.candles as f64 * 10.0
        } else {
            0.0
        };
        clamp_score(50.0 + size + count + clean)
    }
}

/// Highest high minus lowest low
fn span<T: OHLCV>(candles: &[T]) -> f64 {
    let high = candles.iter().map(|c| c.high()).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low()).fold(f64::MAX, f64::min);
    if candles.is_empty() {
        0.0
    } else {
        high - low
    }
}

impl SmcDetector for OrderBlockDetector {
    type Output = Vec<OrderBlock>;

    fn name(&self) -> &'static str {
        "order_block"
    }

    fn scan<T: OHLCV>(&self, candles: &[T], symbol: &str) -> Vec<OrderBlock> {
        if candles.len() < MIN_CANDLES {
            return Vec::new();
        }

        let pip = pip_size(symbol);
        let window = LookbackWindow::trailing(candles, self.config.lookback.get());
        let mut blocks: Vec<OrderBlock> = Vec::new();

        for end in FIRST_IMPULSE_END.max(2)..window.len() {
            let Some((kind, impulse)) = self.impulse_at(&window, end, pip) else {
                continue;
            };

            // Most recent opposite-colored candle before the impulse
            let search_from = impulse.start.saturating_sub(MAX_BLOCK_DISTANCE);
            let block_pos = (search_from..impulse.start).rev().find(|&pos| {
                window.get(pos).is_some_and(|c| match kind {
                    OrderBlockKind::Demand => c.is_bearish(),
                    OrderBlockKind::Supply => c.is_bullish(),
                })
            });
            let Some(block_pos) = block_pos else {
                continue;
            };

            let index = window.absolute(block_pos);
            if blocks.iter().any(|ob| ob.index == index) {
                continue;
            }

            let Some(candle) = window.get(block_pos) else {
                continue;
            };
            let block = OrderBlock {
                kind,
                top: candle.high(),
                bottom: candle.low(),
                strength: Self::score(&impulse),
                index,
                timestamp: candle.timestamp(),
                impulse_candles: impulse.candles,
                impulse_pips: impulse.pips,
                mitigation: Mitigation::Unmitigated,
                touches: 0,
            };
            tracing::trace!(symbol, %block, "order block");
            blocks.push(block);
        }

        // Mitigation against the trailing candles that follow each block
        let tail_start = window.len().saturating_sub(MITIGATION_WINDOW);
        for block in &mut blocks {
            let Some(pos) = window.relative(block.index) else {
                continue;
            };
            let from = tail_start.max(pos + 1);
            block.update_mitigation(window.slice(from, window.len()), window.absolute(from));
        }

        tracing::debug!(
            symbol,
            found = blocks.len(),
            active = blocks.iter().filter(|ob| !ob.is_mitigated()).count(),
            "order block scan"
        );
        blocks
    }

    fn cache(&self) -> &SymbolCache<Vec<OrderBlock>> {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut SymbolCache<Vec<OrderBlock>> {
        &mut self.cache
    }

    fn validate_config(&self) -> Result<()> {
        self.config.validate()
    }
}

// ============================================================
// TESTS
// ============================================================
