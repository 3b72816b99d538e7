//! Crate-wide configuration
//!
//! Every section carries `#[serde(default)]`, so a partial JSON document only
//! overrides the fields it names:
//!
//! ```rust
//! use smcd::config::SmcConfig;
//!
//! let config = SmcConfig::from_json_str(r#"{
//!     "order_block": { "min_impulse_pips": 20.0 },
//!     "cache": { "ttl": 300, "max_symbols": 28 }
//! }"#).unwrap();
//!
//! assert_eq!(config.order_block.min_impulse_pips, 20.0);
//! assert_eq!(config.fair_value_gap.min_gap_pips, 5.0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    cache::CachePolicy,
    detectors::{FairValueGapConfig, LiquiditySweepConfig, MarketStructureConfig, OrderBlockConfig},
    wyckoff::WyckoffConfig,
    PatternError, Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmcConfig {
    pub order_block: OrderBlockConfig,
    pub fair_value_gap: FairValueGapConfig,
    pub liquidity_sweep: LiquiditySweepConfig,
    pub market_structure: MarketStructureConfig,
    /// Used by [`EngineBuilder::wyckoff_analyzer`](crate::EngineBuilder::wyckoff_analyzer)
    pub wyckoff: WyckoffConfig,
    pub cache: CachePolicy,
}

impl SmcConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PatternError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PatternError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), "loaded smc config");
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PatternError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.order_block.validate()?;
        self.fair_value_gap.validate()?;
        self.liquidity_sweep.validate()?;
        self.market_structure.validate()?;
        self.wyckoff.validate()?;
        if self.cache.max_symbols == Some(0) {
            return Err(PatternError::InvalidConfig("cache.max_symbols must be > 0".into()));
        }
        Ok(())
    }
}
