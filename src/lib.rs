//! # SMCD - Smart Money Concept Detector
//!
//! Order block, fair value gap, liquidity sweep and market structure detection
//! over OHLC candle series, plus a Wyckoff phase/event analyzer.
//!
//! ## Quick Start
//!
//! ```rust
//! use smcd::prelude::*;
//!
//! // Any type implementing OHLCV works; `Candle` is provided for convenience.
//! let candles: Vec<Candle> = (0..60)
//!     .map(|i| {
//!         let p = 1.1000 + (i % 7) as f64 * 0.0004;
//!         Candle::new(p, p + 0.0006, p - 0.0006, p + 0.0002)
//!     })
//!     .collect();
//!
//! let mut engine = EngineBuilder::new().build().unwrap();
//! let snapshot = engine.analyze("EURUSD", &candles).unwrap();
//! println!("{} bias: {:?}", snapshot.symbol, snapshot.bias());
//!
//! // Query helpers read the engine's per-symbol cache
//! let active = engine.order_blocks().get_active("EURUSD");
//! assert!(active.iter().all(|ob| !ob.is_mitigated()));
//! ```

pub mod cache;
pub mod config;
pub mod detectors;
pub mod params;
pub mod wyckoff;

pub mod prelude {
    pub use crate::{
        // Cache
        cache::{CachePolicy, SymbolCache},
        // Config
        config::SmcConfig,
        // Detectors
        detectors::*,
        // Parameters
        params::{get_period, get_pips, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Wyckoff
        wyckoff::{
            MarketDataSource, Timeframe, WyckoffAction, WyckoffAnalysis, WyckoffAnalyzer,
            WyckoffConfig, WyckoffEvent, WyckoffEventKind, WyckoffPhase, WyckoffSignal,
        },
        // Parallel
        scan_parallel,
        // Types
        Candle,
        Direction,
        // Engine
        EngineBuilder,
        OHLCVExt,
        // Errors
        PatternError,
        Period,
        Ratio,
        Result,
        ScanError,
        ScanResult,
        // Core traits
        SmcDetector,
        SmcEngine,
        SmcSnapshot,
        TradeSide,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised by configuration, data validation and market-data access.
///
/// Detection itself never fails: short or degenerate input yields an empty
/// result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Market data unavailable for {symbol}: {reason}")]
    MarketData { symbol: String, reason: String },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;

    /// Tick or real volume. Only the Wyckoff analyzer reads it.
    fn volume(&self) -> f64 {
        0.0
    }

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn midpoint(&self) -> f64 {
        (self.high() + self.low()) / 2.0
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Body as ratio of range. Returns None if range is ~0
    #[inline]
    fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.body() / range)
    }

    /// Where the close sits inside the range: 0.0 at the low, 1.0 at the high.
    /// Returns None if range is ~0
    #[inline]
    fn close_position(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| (self.close() - self.low()) / range)
    }

    /// True if the candle's high-low range intersects `[bottom, top]`
    #[inline]
    fn overlaps(&self, bottom: f64, top: f64) -> bool {
        self.high() >= bottom && self.low() <= top
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        if self.open().is_nan()
            || self.high().is_nan()
            || self.low().is_nan()
            || self.close().is_nan()
        {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if self.open().is_infinite()
            || self.high().is_infinite()
            || self.low().is_infinite()
            || self.close().is_infinite()
        {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.volume() < 0.0 {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Validate every bar, reporting the offending index
pub fn validate_bars<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            PatternError::InvalidOHLCV { reason, .. } => {
                PatternError::InvalidOHLCV { index: i, reason }
            }
            other => other,
        })?;
    }
    Ok(())
}

/// Plain OHLCV candle as delivered by the market-data layer
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default, alias = "time")]
    pub timestamp: Option<i64>,
}

impl Candle {
    pub fn new(open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume: 0.0,
            timestamp: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

// ============================================================
// DIRECTION
// ============================================================

/// Direction/bias of a pattern, trend or snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Bullish,
    #[default]
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }
}

/// Side of a trade idea
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Market direction a trade on this side profits from
    pub fn direction(self) -> Direction {
        match self {
            TradeSide::Buy => Direction::Bullish,
            TradeSide::Sell => Direction::Bearish,
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(TradeSide::Buy),
            "SELL" | "SHORT" => Ok(TradeSide::Sell),
            _ => Err(PatternError::InvalidValue("trade side must be BUY or SELL")),
        }
    }
}

// ============================================================
// DETECTOR TRAIT
// ============================================================

/// A smart-money detector: a pure scan plus a per-symbol result cache.
///
/// `scan` never touches the cache and is safe to call from many threads;
/// `detect` rescans and replaces the cached result for the symbol.
pub trait SmcDetector {
    type Output: Clone;

    /// Detector name used in log events
    fn name(&self) -> &'static str;

    fn scan<T: OHLCV>(&self, candles: &[T], symbol: &str) -> Self::Output;

    fn cache(&self) -> &SymbolCache<Self::Output>;

    fn cache_mut(&mut self) -> &mut SymbolCache<Self::Output>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Full rescan; replaces the cached result for `symbol`
    fn detect<T: OHLCV>(&mut self, candles: &[T], symbol: &str) -> Self::Output {
        let output = self.scan(candles, symbol);
        self.cache_mut().insert(symbol, output.clone());
        tracing::trace!(detector = self.name(), symbol, bars = candles.len(), "cached detection");
        output
    }

    /// Cached result of the last `detect` for `symbol`, if still fresh
    fn last_result(&self, symbol: &str) -> Option<&Self::Output> {
        self.cache().get(symbol)
    }
}

// ============================================================
// SNAPSHOT
// ============================================================

use cache::{CachePolicy, SymbolCache};
use config::SmcConfig;
use detectors::*;
use wyckoff::{MarketDataSource, WyckoffAnalyzer, WyckoffConfig};

/// Everything the four smart-money detectors found for one symbol
#[derive(Debug, Clone, serde::Serialize)]
pub struct SmcSnapshot {
    pub symbol: String,
    pub order_blocks: Vec<OrderBlock>,
    pub fair_value_gaps: Vec<FairValueGap>,
    pub sweeps: Vec<LiquiditySweep>,
    pub structure: StructureAnalysis,
}

impl SmcSnapshot {
    /// Net directional bias.
    ///
    /// The structure trend counts twice; the strongest active order block,
    /// the strongest open gap and the latest sweep count once each.
    pub fn bias(&self) -> Direction {
        let vote = |d: Direction| match d {
            Direction::Bullish => 1i32,
            Direction::Bearish => -1,
            Direction::Neutral => 0,
        };

        let mut score = 2 * vote(self.structure.trend);

        if let Some(ob) = strongest(self.order_blocks.iter().filter(|ob| !ob.is_mitigated()), |ob| ob.strength) {
            score += vote(ob.direction());
        }
        if let Some(fvg) = strongest(self.fair_value_gaps.iter().filter(|g| !g.is_filled()), |g| g.strength) {
            score += vote(fvg.direction());
        }
        if let Some(sweep) = self.sweeps.iter().max_by_key(|s| s.index) {
            score += vote(sweep.direction());
        }

        match score {
            s if s > 0 => Direction::Bullish,
            s if s < 0 => Direction::Bearish,
            _ => Direction::Neutral,
        }
    }
}

fn strongest<'a, P: 'a>(
    items: impl Iterator<Item = &'a P>,
    strength: impl Fn(&P) -> f64,
) -> Option<&'a P> {
    items.max_by(|a, b| strength(a).total_cmp(&strength(b)))
}

// ============================================================
// ENGINE
// ============================================================

/// Runs all four smart-money detectors over one candle series
#[derive(Debug, Clone)]
pub struct SmcEngine {
    order_blocks: OrderBlockDetector,
    fair_value_gaps: FairValueGapDetector,
    sweeps: LiquiditySweepDetector,
    structure: MarketStructureDetector,
    validate_data: bool,
}

impl SmcEngine {
    /// Stateless scan of every detector. Caches are left untouched.
    pub fn scan<T: OHLCV>(&self, symbol: &str, candles: &[T]) -> Result<SmcSnapshot> {
        if self.validate_data {
            validate_bars(candles)?;
        }

        Ok(SmcSnapshot {
            symbol: symbol.to_string(),
            order_blocks: self.order_blocks.scan(candles, symbol),
            fair_value_gaps: self.fair_value_gaps.scan(candles, symbol),
            sweeps: self.sweeps.scan(candles, symbol),
            structure: self.structure.scan(candles, symbol),
        })
    }

    /// Scan every detector and replace the cached results for `symbol`
    pub fn analyze<T: OHLCV>(&mut self, symbol: &str, candles: &[T]) -> Result<SmcSnapshot> {
        if self.validate_data {
            validate_bars(candles)?;
        }

        let snapshot = SmcSnapshot {
            symbol: symbol.to_string(),
            order_blocks: self.order_blocks.detect(candles, symbol),
            fair_value_gaps: self.fair_value_gaps.detect(candles, symbol),
            sweeps: self.sweeps.detect(candles, symbol),
            structure: self.structure.detect(candles, symbol),
        };

        tracing::debug!(
            symbol,
            order_blocks = snapshot.order_blocks.len(),
            fair_value_gaps = snapshot.fair_value_gaps.len(),
            sweeps = snapshot.sweeps.len(),
            structure_events = snapshot.structure.events.len(),
            trend = ?snapshot.structure.trend,
            "smc analysis complete"
        );

        Ok(snapshot)
    }

    pub fn order_blocks(&self) -> &OrderBlockDetector {
        &self.order_blocks
    }

    pub fn order_blocks_mut(&mut self) -> &mut OrderBlockDetector {
        &mut self.order_blocks
    }

    pub fn fair_value_gaps(&self) -> &FairValueGapDetector {
        &self.fair_value_gaps
    }

    pub fn fair_value_gaps_mut(&mut self) -> &mut FairValueGapDetector {
        &mut self.fair_value_gaps
    }

    pub fn sweeps(&self) -> &LiquiditySweepDetector {
        &self.sweeps
    }

    pub fn sweeps_mut(&mut self) -> &mut LiquiditySweepDetector {
        &mut self.sweeps
    }

    pub fn structure(&self) -> &MarketStructureDetector {
        &self.structure
    }

    pub fn structure_mut(&mut self) -> &mut MarketStructureDetector {
        &mut self.structure
    }

    fn validate(&self) -> Result<()> {
        self.order_blocks.validate_config()?;
        self.fair_value_gaps.validate_config()?;
        self.sweeps.validate_config()?;
        self.structure.validate_config()?;
        Ok(())
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating SmcEngine instances
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: SmcConfig,
    validate_data: bool,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SmcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn order_block(mut self, config: OrderBlockConfig) -> Self {
        self.config.order_block = config;
        self
    }

    pub fn fair_value_gap(mut self, config: FairValueGapConfig) -> Self {
        self.config.fair_value_gap = config;
        self
    }

    pub fn liquidity_sweep(mut self, config: LiquiditySweepConfig) -> Self {
        self.config.liquidity_sweep = config;
        self
    }

    pub fn market_structure(mut self, config: MarketStructureConfig) -> Self {
        self.config.market_structure = config;
        self
    }

    /// Cache policy shared by every detector's per-symbol cache
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.cache = policy;
        self
    }

    pub fn wyckoff(mut self, config: WyckoffConfig) -> Self {
        self.config.wyckoff = config;
        self
    }

    /// Wyckoff analyzer over `source` with this builder's Wyckoff settings
    /// and cache policy
    pub fn wyckoff_analyzer<S: MarketDataSource>(&self, source: S) -> Result<WyckoffAnalyzer<S>> {
        self.config.wyckoff.validate()?;
        Ok(WyckoffAnalyzer::with_cache(
            source,
            self.config.wyckoff,
            SymbolCache::new(self.config.cache),
        ))
    }

    /// Enable/disable OHLC validation before each scan
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.validate_data = enable;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<SmcEngine> {
        let policy = self.config.cache;
        let engine = SmcEngine {
            order_blocks: OrderBlockDetector::with_cache(
                self.config.order_block,
                SymbolCache::new(policy),
            ),
            fair_value_gaps: FairValueGapDetector::with_cache(
                self.config.fair_value_gap,
                SymbolCache::new(policy),
            ),
            sweeps: LiquiditySweepDetector::with_cache(
                self.config.liquidity_sweep,
                SymbolCache::new(policy),
            ),
            structure: MarketStructureDetector::with_cache(
                self.config.market_structure,
                SymbolCache::new(policy),
            ),
            validate_data: self.validate_data,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub snapshot: SmcSnapshot,
}

/// Error from scanning a single instrument
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub error: PatternError,
}

/// Parallel scanning of multiple instruments.
///
/// Uses the stateless [`SmcEngine::scan`] path, so the engine's caches are
/// not updated.
pub fn scan_parallel<'a, T, I>(
    engine: &SmcEngine,
    instruments: I,
) -> (Vec<ScanResult>, Vec<ScanError>)
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, bars)| {
            engine
                .scan(symbol, bars)
                .map(|snapshot| ScanResult {
                    symbol: symbol.to_string(),
                    snapshot,
                })
                .map_err(|error| ScanError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TESTS
// ============================================================
