//! Wyckoff event detection: climaxes, automatic rallies/reactions, secondary
//! tests, springs and upthrusts

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{phase::WyckoffPhase, WyckoffConfig};
use crate::detectors::helpers::{atr, volume_ma};
use crate::{OHLCVExt, OHLCV};

// ============================================================
// TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WyckoffEventKind {
    /// SC: capitulation low on climactic volume
    SellingClimax,
    /// AR: first strong bounce after a selling climax
    AutomaticRally,
    /// ST: low-volume revisit of a climax extreme
    SecondaryTest,
    /// False break below support that closes back inside
    Spring,
    /// BC: exhaustion high on climactic volume
    BuyingClimax,
    /// First sharp drop after a buying climax
    AutomaticReaction,
    /// False break above resistance that closes back inside
    Upthrust,
}

impl WyckoffEventKind {
    pub fn abbreviation(self) -> &'static str {
        match self {
            WyckoffEventKind::SellingClimax => "SC",
            WyckoffEventKind::AutomaticRally => "AR",
            WyckoffEventKind::SecondaryTest => "ST",
            WyckoffEventKind::Spring => "Spring",
            WyckoffEventKind::BuyingClimax => "BC",
            WyckoffEventKind::AutomaticReaction => "AR",
            WyckoffEventKind::Upthrust => "UT",
        }
    }

    fn is_climax(self) -> bool {
        matches!(self, WyckoffEventKind::SellingClimax | WyckoffEventKind::BuyingClimax)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WyckoffEvent {
    /// Bar index in the analyzed series
    pub index: usize,
    pub kind: WyckoffEventKind,
    pub price: f64,
    pub volume: f64,
    pub description: String,
}

impl fmt::Display for WyckoffEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:.5}", self.kind.abbreviation(), self.price)
    }
}

/// Per-bar ATR and volume moving average
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Indicators {
    pub atr: Vec<f64>,
    pub volume_ma: Vec<f64>,
}

impl Indicators {
    pub fn compute<T: OHLCV>(bars: &[T], config: &WyckoffConfig) -> Self {
        Self {
            atr: atr(bars, config.atr_period.get()),
            volume_ma: volume_ma(bars, config.volume_period.get()),
        }
    }

    #[inline]
    fn at(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.atr.get(index)?, *self.volume_ma.get(index)?))
    }
}

// ============================================================
// DETECTION
// ============================================================

/// Scan `bars` for the events of the current phase, oldest first.
///
/// Only Accumulation and Distribution produce events. Each bar yields at most
/// one event, checked in the order climax, automatic rally/reaction, spring or
/// upthrust, secondary test.
pub fn detect_events<T: OHLCV>(
    bars: &[T],
    indicators: &Indicators,
    phase: WyckoffPhase,
    config: &WyckoffConfig,
) -> Vec<WyckoffEvent> {
    let side = match phase {
        WyckoffPhase::Accumulation => Side::Accumulation,
        WyckoffPhase::Distribution => Side::Distribution,
        _ => return Vec::new(),
    };

    let lookback = config.extreme_lookback.get();
    let mut events: Vec<WyckoffEvent> = Vec::new();

    for i in lookback..bars.len() {
        let Some((atr, vol_ma)) = indicators.at(i) else {
            break;
        };
        let bar = &bars[i];
        let Some(close_pos) = bar.close_position() else {
            continue;
        };
        let prior = &bars[i - lookback..i];
        let ctx = BarContext {
            index: i,
            atr,
            vol_ma,
            close_pos,
            prior_high: prior.iter().map(|b| b.high()).fold(f64::MIN, f64::max),
            prior_low: prior.iter().map(|b| b.low()).fold(f64::MAX, f64::min),
        };

        let event = side
            .climax(bar, &ctx, config)
            .or_else(|| side.automatic_move(bars, bar, &ctx, events.last(), config))
            .or_else(|| side.false_break(bar, &ctx, config))
            .or_else(|| side.secondary_test(bar, &ctx, &events, config));

        if let Some(event) = event {
            tracing::trace!(index = i, event = %event, "wyckoff event");
            events.push(event);
        }
    }

    events
}

struct BarContext {
    index: usize,
    atr: f64,
    vol_ma: f64,
    close_pos: f64,
    prior_high: f64,
    prior_low: f64,
}

#[derive(Clone, Copy)]
enum Side {
    Accumulation,
    Distribution,
}

impl Side {
    fn event<T: OHLCV>(kind: WyckoffEventKind, bar: &T, index: usize, price: f64, description: String) -> WyckoffEvent {
        WyckoffEvent {
            index,
            kind,
            price,
            volume: bar.volume(),
            description,
        }
    }

    /// New extreme on climactic volume and range, closing away from it
    fn climax<T: OHLCV>(self, bar: &T, ctx: &BarContext, config: &WyckoffConfig) -> Option<WyckoffEvent> {
        let climactic = bar.volume() > config.climax_volume_factor * ctx.vol_ma
            && bar.range() > config.climax_range_factor * ctx.atr;
        if !climactic {
            return None;
        }
        let ratio = if ctx.vol_ma > 0.0 { bar.volume() / ctx.vol_ma } else { 0.0 };

        match self {
            Side::Accumulation if bar.low() < ctx.prior_low && ctx.close_pos >= 0.5 => Some(Self::event(
                WyckoffEventKind::SellingClimax,
                bar,
                ctx.index,
                bar.low(),
                format!("Selling climax at {:.5} on {ratio:.1}x volume", bar.low()),
            )),
            Side::Distribution if bar.high() > ctx.prior_high && ctx.close_pos <= 0.5 => Some(Self::event(
                WyckoffEventKind::BuyingClimax,
                bar,
                ctx.index,
                bar.high(),
                format!("Buying climax at {:.5} on {ratio:.1}x volume", bar.high()),
            )),
            _ => None,
        }
    }

    /// Bounce right after a climax that clears the climax bar on elevated volume
    fn automatic_move<T: OHLCV>(
        self,
        bars: &[T],
        bar: &T,
        ctx: &BarContext,
        previous: Option<&WyckoffEvent>,
        config: &WyckoffConfig,
    ) -> Option<WyckoffEvent> {
        let climax = previous.filter(|e| e.kind.is_climax())?;
        let distance = ctx.index.checked_sub(climax.index)?;
        if distance == 0 || distance > config.reaction_window.get() || bar.volume() <= ctx.vol_ma {
            return None;
        }
        let climax_bar = bars.get(climax.index)?;

        match (self, climax.kind) {
            (Side::Accumulation, WyckoffEventKind::SellingClimax)
                if bar.is_bullish() && bar.close() > climax_bar.high() =>
            {
                Some(Self::event(
                    WyckoffEventKind::AutomaticRally,
                    bar,
                    ctx.index,
                    bar.high(),
                    format!("Automatic rally to {:.5}, {distance} bars after SC", bar.high()),
                ))
            },
            (Side::Distribution, WyckoffEventKind::BuyingClimax)
                if bar.is_bearish() && bar.close() < climax_bar.low() =>
            {
                Some(Self::event(
                    WyckoffEventKind::AutomaticReaction,
                    bar,
                    ctx.index,
                    bar.low(),
                    format!("Automatic reaction to {:.5}, {distance} bars after BC", bar.low()),
                ))
            },
            _ => None,
        }
    }

    /// Spring or upthrust: low-volume break of the prior extreme that closes
    /// back inside the range near the opposite end of the bar
    fn false_break<T: OHLCV>(self, bar: &T, ctx: &BarContext, config: &WyckoffConfig) -> Option<WyckoffEvent> {
        if bar.volume() >= ctx.vol_ma {
            return None;
        }
        let threshold = config.spring_close_position.get();

        match self {
            Side::Accumulation
                if bar.low() < ctx.prior_low && ctx.close_pos > threshold && bar.close() > ctx.prior_low =>
            {
                Some(Self::event(
                    WyckoffEventKind::Spring,
                    bar,
                    ctx.index,
                    bar.low(),
                    format!("Spring below {:.5} reclaimed at {:.5}", ctx.prior_low, bar.close()),
                ))
            },
            Side::Distribution
                if bar.high() > ctx.prior_high
                    && ctx.close_pos < 1.0 - threshold
                    && bar.close() < ctx.prior_high =>
            {
                Some(Self::event(
                    WyckoffEventKind::Upthrust,
                    bar,
                    ctx.index,
                    bar.high(),
                    format!("Upthrust above {:.5} rejected at {:.5}", ctx.prior_high, bar.close()),
                ))
            },
            _ => None,
        }
    }

    /// Quiet, narrow bar revisiting the most recent climax price
    fn secondary_test<T: OHLCV>(
        self,
        bar: &T,
        ctx: &BarContext,
        events: &[WyckoffEvent],
        config: &WyckoffConfig,
    ) -> Option<WyckoffEvent> {
        if bar.volume() >= ctx.vol_ma || bar.range() >= ctx.atr {
            return None;
        }
        let tolerance = config.test_tolerance_atr * ctx.atr;

        let (climax_kind, revisit) = match self {
            Side::Accumulation => (WyckoffEventKind::SellingClimax, bar.low()),
            Side::Distribution => (WyckoffEventKind::BuyingClimax, bar.high()),
        };
        let climax = events.iter().rev().find(|e| e.kind == climax_kind)?;
        if climax.index >= ctx.index || (revisit - climax.price).abs() > tolerance {
            return None;
        }

        Some(Self::event(
            WyckoffEventKind::SecondaryTest,
            bar,
            ctx.index,
            revisit,
            format!("Secondary test of {:.5} on light volume", climax.price),
        ))
    }
}

// ============================================================
// TESTS
// ============================================================
