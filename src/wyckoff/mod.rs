//! Wyckoff phase, event and LPS/LPSY analysis
//!
//! The analyzer pulls candles from a [`MarketDataSource`], classifies the
//! market-cycle phase, scans for the events of that phase and derives a single
//! trade signal from the Last Point of Support (or Supply).
//!
//! ```rust
//! use smcd::prelude::*;
//!
//! struct Feed(Vec<Candle>);
//!
//! impl MarketDataSource for Feed {
//!     fn candles(&self, _symbol: &str, _tf: Timeframe, count: usize) -> Result<Vec<Candle>> {
//!         let start = self.0.len().saturating_sub(count);
//!         Ok(self.0[start..].to_vec())
//!     }
//! }
//!
//! let bars: Vec<Candle> = (0..120)
//!     .map(|i| {
//!         let p = 1.1000 + i as f64 * 0.0005;
//!         Candle::new(p, p + 0.0004, p - 0.0004, p + 0.0002).with_volume(100.0)
//!     })
//!     .collect();
//!
//! let mut analyzer = WyckoffAnalyzer::new(Feed(bars), WyckoffConfig::default());
//! let analysis = analyzer.analyze("EURUSD", Timeframe::H1, 100).unwrap();
//! assert_eq!(analysis.phase, WyckoffPhase::Markup);
//! assert_eq!(analysis.signal.action, WyckoffAction::Wait);
//! ```

pub mod events;
pub mod phase;
pub mod signal;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use events::{detect_events, Indicators, WyckoffEvent, WyckoffEventKind};
pub use phase::{classify_phase, PhaseReading, WyckoffPhase};
pub use signal::{
    detect_last_point, generate_signal, LastPoint, LastPointChecks, LastPointKind, LpsStrength,
    WyckoffAction, WyckoffSignal,
};

use crate::{
    cache::SymbolCache,
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Candle, PatternError, Period, Ratio, Result, OHLCV,
};

/// Bars requested by [`WyckoffAnalyzer::analyze_default`]
pub const DEFAULT_BARS: usize = 100;

// ============================================================
// TIMEFRAME
// ============================================================

/// Chart timeframe, labelled the MetaTrader way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    pub fn minutes(self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
            Timeframe::MN1 => 43200,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }

    /// All timeframes, shortest first
    pub fn all() -> [Timeframe; 9] {
        [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
            Timeframe::MN1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Timeframe::all()
            .into_iter()
            .find(|tf| tf.label() == upper)
            .ok_or(PatternError::InvalidValue("unknown timeframe"))
    }
}

// ============================================================
// MARKET DATA PORT
// ============================================================

/// Source of historical candles, oldest first
pub trait MarketDataSource {
    /// Up to `count` most recent candles. Fewer may be returned when history
    /// is short; an error means the source is unavailable.
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>>;
}

impl<S: MarketDataSource + ?Sized> MarketDataSource for &S {
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>> {
        (**self).candles(symbol, timeframe, count)
    }
}

// ============================================================
// CONFIG
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WyckoffConfig {
    /// Fewer bars than this and no analysis is produced
    pub min_bars: Period,
    pub atr_period: Period,
    pub volume_period: Period,
    /// Trailing bars used for phase classification
    pub phase_window: Period,
    /// Max (high - low) / high for the window to count as ranging
    pub range_tolerance: f64,
    /// Short MA must clear the long MA by this fraction for Markup/Markdown
    pub trend_margin: f64,
    pub climax_volume_factor: f64,
    pub climax_range_factor: f64,
    /// Bars after a climax in which an automatic rally/reaction may occur
    pub reaction_window: Period,
    /// Bars defining the prior extreme for climaxes and false breaks
    pub extreme_lookback: Period,
    /// Secondary test distance from the climax price, in ATRs
    pub test_tolerance_atr: f64,
    /// Close position (from the low) a spring must exceed
    pub spring_close_position: Ratio,
    pub lps_scan_bars: Period,
    pub lps_support_bars: Period,
    pub lps_volume_factor: f64,
    pub lps_spread_factor: f64,
    /// Target distance in LPS bar ranges
    pub target_multiple: f64,
}

impl Default for WyckoffConfig {
    fn default() -> Self {
        Self {
            min_bars: Period::new_const(50),
            atr_period: Period::new_const(14),
            volume_period: Period::new_const(20),
            phase_window: Period::new_const(50),
            range_tolerance: 0.03,
            trend_margin: 0.001,
            climax_volume_factor: 2.0,
            climax_range_factor: 1.5,
            reaction_window: Period::new_const(5),
            extreme_lookback: Period::new_const(20),
            test_tolerance_atr: 0.5,
            spring_close_position: Ratio::new_const(0.6),
            lps_scan_bars: Period::new_const(10),
            lps_support_bars: Period::new_const(30),
            lps_volume_factor: 0.8,
            lps_spread_factor: 0.7,
            target_multiple: 3.0,
        }
    }
}

impl WyckoffConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("wyckoff.range_tolerance", self.range_tolerance),
            ("wyckoff.climax_volume_factor", self.climax_volume_factor),
            ("wyckoff.climax_range_factor", self.climax_range_factor),
            ("wyckoff.test_tolerance_atr", self.test_tolerance_atr),
            ("wyckoff.lps_volume_factor", self.lps_volume_factor),
            ("wyckoff.lps_spread_factor", self.lps_spread_factor),
            ("wyckoff.target_multiple", self.target_multiple),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PatternError::InvalidConfig(format!("{name} must be > 0, got {value}")));
            }
        }
        if !self.trend_margin.is_finite() || self.trend_margin < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "wyckoff.trend_margin must be >= 0, got {}",
                self.trend_margin
            )));
        }
        if self.extreme_lookback.get() >= self.min_bars.get() {
            return Err(PatternError::InvalidConfig(format!(
                "wyckoff.extreme_lookback ({}) must be below min_bars ({})",
                self.extreme_lookback.get(),
                self.min_bars.get()
            )));
        }
        Ok(())
    }
}

pub const WYCKOFF_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("phase_window", 50.0, (30.0, 100.0, 10.0), "Bars used for phase classification"),
    ParamMeta::ratio("range_tolerance", 0.03, (0.01, 0.06, 0.01), "Max range/high for a trading range"),
    ParamMeta::ratio("climax_volume_factor", 2.0, (1.5, 3.0, 0.5), "Climax volume vs average"),
    ParamMeta::ratio("climax_range_factor", 1.5, (1.0, 2.5, 0.5), "Climax range vs ATR"),
    ParamMeta::ratio("spring_close_position", 0.6, (0.5, 0.8, 0.1), "Spring close position in bar"),
    ParamMeta::ratio("target_multiple", 3.0, (1.0, 5.0, 1.0), "Target distance in LPS ranges"),
];

impl ParameterizedDetector for WyckoffConfig {
    fn param_meta() -> &'static [ParamMeta] {
        WYCKOFF_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let defaults = Self::default();
        let value = |key: &str, default: f64| params.get(key).copied().unwrap_or(default);
        let config = Self {
            phase_window: get_period(params, "phase_window", defaults.phase_window.get())?,
            range_tolerance: value("range_tolerance", defaults.range_tolerance),
            climax_volume_factor: value("climax_volume_factor", defaults.climax_volume_factor),
            climax_range_factor: value("climax_range_factor", defaults.climax_range_factor),
            spring_close_position: get_ratio(params, "spring_close_position", defaults.spring_close_position.get())?,
            target_multiple: value("target_multiple", defaults.target_multiple),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    fn detector_name() -> &'static str {
        "wyckoff"
    }
}

// ============================================================
// ANALYSIS
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WyckoffAnalysis {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub phase: WyckoffPhase,
    pub reading: PhaseReading,
    pub events: Vec<WyckoffEvent>,
    pub last_point: Option<LastPoint>,
    pub signal: WyckoffSignal,
    /// ATR of the last bar
    pub atr: f64,
    /// Volume average of the last bar
    pub volume_ma: f64,
}

/// Analyze a candle series directly, without a market-data source.
///
/// Returns `None` when fewer than `config.min_bars` candles are given.
pub fn analyze_candles<T: OHLCV>(
    config: &WyckoffConfig,
    symbol: &str,
    timeframe: Timeframe,
    candles: &[T],
) -> Option<WyckoffAnalysis> {
    if candles.len() < config.min_bars.get() {
        tracing::debug!(symbol, %timeframe, bars = candles.len(), "not enough history for wyckoff analysis");
        return None;
    }

    let indicators = Indicators::compute(candles, config);
    let reading = classify_phase(candles, config);
    let events = detect_events(candles, &indicators, reading.phase, config);
    let last_point = detect_last_point(candles, &indicators, reading.phase, &events, config);
    let signal = generate_signal(reading.phase, last_point.as_ref(), config);

    tracing::debug!(
        symbol,
        %timeframe,
        phase = %reading.phase,
        events = events.len(),
        action = ?signal.action,
        "wyckoff analysis complete"
    );

    Some(WyckoffAnalysis {
        symbol: symbol.to_string(),
        timeframe,
        phase: reading.phase,
        reading,
        events,
        last_point,
        signal,
        atr: indicators.atr.last().copied().unwrap_or_default(),
        volume_ma: indicators.volume_ma.last().copied().unwrap_or_default(),
    })
}

/// Wyckoff analyzer bound to a market-data source, caching the event list of
/// the last analysis per symbol
#[derive(Debug, Clone)]
pub struct WyckoffAnalyzer<S> {
    source: S,
    pub config: WyckoffConfig,
    events: SymbolCache<Vec<WyckoffEvent>>,
}

impl<S: MarketDataSource> WyckoffAnalyzer<S> {
    pub fn new(source: S, config: WyckoffConfig) -> Self {
        Self::with_cache(source, config, SymbolCache::default())
    }

    pub fn with_cache(source: S, config: WyckoffConfig, events: SymbolCache<Vec<WyckoffEvent>>) -> Self {
        Self { source, config, events }
    }

    /// Fetch `bars` candles and analyze them.
    ///
    /// Returns `None` if the source fails or delivers too little history.
    pub fn analyze(&mut self, symbol: &str, timeframe: Timeframe, bars: usize) -> Option<WyckoffAnalysis> {
        let candles = match self.source.candles(symbol, timeframe, bars) {
            Ok(candles) => candles,
            Err(error) => {
                tracing::warn!(symbol, %timeframe, %error, "market data unavailable");
                return None;
            },
        };

        let analysis = analyze_candles(&self.config, symbol, timeframe, &candles)?;
        self.events.insert(symbol, analysis.events.clone());
        Some(analysis)
    }

    pub fn analyze_default(&mut self, symbol: &str, timeframe: Timeframe) -> Option<WyckoffAnalysis> {
        self.analyze(symbol, timeframe, DEFAULT_BARS)
    }

    /// Events recorded by the last analysis of `symbol`
    pub fn events(&self, symbol: &str) -> &[WyckoffEvent] {
        self.events.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_labels() {
        assert_eq!(Timeframe::H4.to_string(), "H4");
        assert_eq!("mn1".parse::<Timeframe>().unwrap(), Timeframe::MN1);
        assert!("H2".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::D1.minutes(), 1440);
    }

    #[test]
    fn test_config_validation() {
        assert!(WyckoffConfig::default().validate().is_ok());

        let mut bad = WyckoffConfig::default();
        bad.climax_volume_factor = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = WyckoffConfig::default();
        bad.extreme_lookback = Period::new_const(60);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_with_params() {
        let params = HashMap::from([("range_tolerance", 0.05), ("phase_window", 60.0)]);
        let config = WyckoffConfig::with_params(&params).unwrap();
        assert_eq!(config.range_tolerance, 0.05);
        assert_eq!(config.phase_window.get(), 60);
        assert_eq!(config.atr_period.get(), 14);
        assert_eq!(WyckoffConfig::detector_name(), "wyckoff");
    }

    #[test]
    fn test_analyze_candles_needs_min_bars() {
        let bars: Vec<Candle> = (0..49).map(|_| Candle::new(1.1, 1.1005, 1.0995, 1.1)).collect();
        assert!(analyze_candles(&WyckoffConfig::default(), "EURUSD", Timeframe::H1, &bars).is_none());
    }
}
