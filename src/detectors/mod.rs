//! Smart-money concept detectors
//!
//! Each detector is a pure scan over a trailing lookback window plus a
//! per-symbol cache of the last result.
//!
//! # Detectors
//!
//! - **Order Block**: last opposite-color candle before an impulsive move
//! - **Fair Value Gap**: three-candle price imbalance and its fill progress
//! - **Liquidity Sweep**: wick through clustered swing levels with rejection
//! - **Market Structure**: trend, BOS and CHoCH from swing sequences

pub mod helpers;

pub mod fair_value_gap;
pub mod liquidity_sweep;
pub mod market_structure;
pub mod order_block;

// Re-export detector types for convenience. Per-module constants such as
// `MIN_CANDLES` stay behind their module path.
pub use fair_value_gap::{
    FairValueGap, FairValueGapConfig, FairValueGapDetector, FillState, FillTargets, FvgKind,
    FAIR_VALUE_GAP_PARAMS,
};
pub use helpers::{pip_size, LookbackWindow, SwingKind, SwingPoint};
pub use liquidity_sweep::{
    cluster_levels, LiquidityLevel, LiquiditySweep, LiquiditySweepConfig, LiquiditySweepDetector,
    SweepKind, LIQUIDITY_SWEEP_PARAMS,
};
pub use market_structure::{
    classify_swings, MarketStructureConfig, MarketStructureDetector, StructureAnalysis,
    StructureEvent, StructureKind, MARKET_STRUCTURE_PARAMS,
};
pub use order_block::{
    Mitigation, OrderBlock, OrderBlockConfig, OrderBlockDetector, OrderBlockKind,
    ORDER_BLOCK_PARAMS,
};
