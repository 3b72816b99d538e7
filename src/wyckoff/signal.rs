//! Last Point of Support / Supply detection and trade signal generation

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    events::{Indicators, WyckoffEvent, WyckoffEventKind},
    phase::WyckoffPhase,
    WyckoffConfig,
};
use crate::{OHLCVExt, TradeSide, OHLCV};

/// Recent events searched for the Spring/Upthrust/ST antecedent
pub const RECENT_EVENTS: usize = 10;

// ============================================================
// LPS / LPSY
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LastPointKind {
    /// LPS: higher low in accumulation
    Support,
    /// LPSY: lower high in distribution
    Supply,
}

impl LastPointKind {
    pub fn side(self) -> TradeSide {
        match self {
            LastPointKind::Support => TradeSide::Buy,
            LastPointKind::Supply => TradeSide::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LpsStrength {
    Weak,
    Moderate,
    Strong,
}

impl LpsStrength {
    /// Map a 0..=5 criteria tally
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 4 => LpsStrength::Strong,
            3 => LpsStrength::Moderate,
            _ => LpsStrength::Weak,
        }
    }
}

/// Boolean criteria behind an LPS/LPSY
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LastPointChecks {
    pub low_volume: bool,
    pub narrow_spread: bool,
    pub favorable_close: bool,
    /// Next bar closes further in the trade direction
    pub continuation: bool,
    /// Next bar trades more volume
    pub volume_confirmation: bool,
}

impl LastPointChecks {
    pub fn score(&self) -> u8 {
        [
            self.low_volume,
            self.narrow_spread,
            self.favorable_close,
            self.continuation,
            self.volume_confirmation,
        ]
        .into_iter()
        .filter(|c| *c)
        .count() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LastPoint {
    pub kind: LastPointKind,
    pub index: usize,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub checks: LastPointChecks,
    pub strength: LpsStrength,
    pub confirmed: bool,
}

impl fmt::Display for LastPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            LastPointKind::Support => "LPS",
            LastPointKind::Supply => "LPSY",
        };
        write!(f, "{label} {:.5}-{:.5} ({:?})", self.low, self.high, self.strength)
    }
}

/// Find the best LPS (Accumulation) or LPSY (Distribution).
///
/// Requires a Spring or Secondary Test (Upthrust or Secondary Test for LPSY)
/// among the last few events. A candidate is a low-volume, narrow-spread bar
/// inside the last `lps_scan_bars` that closes in the favorable half of its
/// range and holds a higher low (lower high) than the `lps_support_bars`
/// before it. Confirmed candidates win, then the higher tally, then the later
/// bar.
pub fn detect_last_point<T: OHLCV>(
    bars: &[T],
    indicators: &Indicators,
    phase: WyckoffPhase,
    events: &[WyckoffEvent],
    config: &WyckoffConfig,
) -> Option<LastPoint> {
    let kind = match phase {
        WyckoffPhase::Accumulation => LastPointKind::Support,
        WyckoffPhase::Distribution => LastPointKind::Supply,
        _ => return None,
    };

    let antecedent = match kind {
        LastPointKind::Support => WyckoffEventKind::Spring,
        LastPointKind::Supply => WyckoffEventKind::Upthrust,
    };
    let recent = &events[events.len().saturating_sub(RECENT_EVENTS)..];
    if !recent
        .iter()
        .any(|e| e.kind == antecedent || e.kind == WyckoffEventKind::SecondaryTest)
    {
        return None;
    }

    let support_bars = config.lps_support_bars.get();
    let first = bars.len().saturating_sub(config.lps_scan_bars.get()).max(support_bars);

    (first..bars.len())
        .filter_map(|i| evaluate(bars, indicators, kind, i, config))
        .max_by_key(|point| (point.confirmed, point.checks.score(), point.index))
}

fn evaluate<T: OHLCV>(
    bars: &[T],
    indicators: &Indicators,
    kind: LastPointKind,
    i: usize,
    config: &WyckoffConfig,
) -> Option<LastPoint> {
    let bar = bars.get(i)?;
    let atr = *indicators.atr.get(i)?;
    let vol_ma = *indicators.volume_ma.get(i)?;
    let prior = &bars[i.checked_sub(config.lps_support_bars.get())?..i];

    let low_volume = bar.volume() < config.lps_volume_factor * vol_ma;
    let holds = match kind {
        LastPointKind::Support => bar.low() > prior.iter().map(|b| b.low()).fold(f64::MAX, f64::min),
        LastPointKind::Supply => bar.high() < prior.iter().map(|b| b.high()).fold(f64::MIN, f64::max),
    };
    let narrow_spread = bar.range() < config.lps_spread_factor * atr;
    let close_pos = bar.close_position().unwrap_or(0.5);
    let favorable_close = match kind {
        LastPointKind::Support => close_pos > 0.5,
        LastPointKind::Supply => close_pos < 0.5,
    };
    if !low_volume || !holds || !narrow_spread || !favorable_close {
        return None;
    }

    let next = bars.get(i + 1);
    let checks = LastPointChecks {
        low_volume,
        narrow_spread,
        favorable_close,
        continuation: next.is_some_and(|n| match kind {
            LastPointKind::Support => n.close() > bar.close(),
            LastPointKind::Supply => n.close() < bar.close(),
        }),
        volume_confirmation: next.is_some_and(|n| n.volume() > bar.volume()),
    };

    Some(LastPoint {
        kind,
        index: i,
        high: bar.high(),
        low: bar.low(),
        close: bar.close(),
        volume: bar.volume(),
        strength: LpsStrength::from_score(checks.score()),
        confirmed: checks.continuation && checks.volume_confirmation,
        checks,
    })
}

// ============================================================
// SIGNAL
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WyckoffAction {
    Buy,
    Sell,
    #[default]
    Wait,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WyckoffSignal {
    pub action: WyckoffAction,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub strength: Option<LpsStrength>,
    /// Why the signal is (or is not) actionable
    pub reasons: Vec<String>,
}

impl WyckoffSignal {
    fn wait(reasons: Vec<String>) -> Self {
        Self {
            reasons,
            ..Self::default()
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != WyckoffAction::Wait
    }
}

/// Turn a confirmed Strong/Moderate LPS into BUY (LPSY into SELL).
///
/// Entry at the LPS bar's high, stop at its low and target `target_multiple`
/// bar ranges beyond entry; mirrored for LPSY.
pub fn generate_signal(phase: WyckoffPhase, point: Option<&LastPoint>, config: &WyckoffConfig) -> WyckoffSignal {
    let Some(point) = point else {
        return WyckoffSignal::wait(vec![format!("No LPS/LPSY found in {phase} phase")]);
    };

    let mut reasons = Vec::new();
    if !point.confirmed {
        if !point.checks.continuation {
            reasons.push(format!("{point}: next bar did not continue"));
        }
        if !point.checks.volume_confirmation {
            reasons.push(format!("{point}: no volume confirmation"));
        }
    }
    if point.strength == LpsStrength::Weak {
        reasons.push(format!("{point}: only {}/5 criteria met", point.checks.score()));
    }
    if !reasons.is_empty() {
        return WyckoffSignal::wait(reasons);
    }

    let range = point.high - point.low;
    let (action, entry, stop, target) = match point.kind.side() {
        TradeSide::Buy => (
            WyckoffAction::Buy,
            point.high,
            point.low,
            point.high + config.target_multiple * range,
        ),
        TradeSide::Sell => (
            WyckoffAction::Sell,
            point.low,
            point.high,
            point.low - config.target_multiple * range,
        ),
    };

    WyckoffSignal {
        action,
        entry: Some(entry),
        stop_loss: Some(stop),
        take_profit: Some(target),
        strength: Some(point.strength),
        reasons: vec![format!("{point} confirmed in {phase} phase")],
    }
}

// ============================================================
// TESTS
// ============================================================
