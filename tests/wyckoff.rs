//! Integration tests for the Wyckoff analyzer and its market-data port.

use std::cell::Cell;
use std::collections::HashMap;

use smcd::prelude::*;
use smcd::wyckoff::{analyze_candles, DEFAULT_BARS};

/// In-memory feed that records the last requested bar count
#[derive(Default)]
struct MockFeed {
    series: HashMap<String, Vec<Candle>>,
    requested: Cell<usize>,
}

impl MockFeed {
    fn with(mut self, symbol: &str, bars: Vec<Candle>) -> Self {
        self.series.insert(symbol.to_string(), bars);
        self
    }
}

impl MarketDataSource for MockFeed {
    fn candles(&self, symbol: &str, _timeframe: Timeframe, count: usize) -> Result<Vec<Candle>> {
        self.requested.set(count);
        let bars = self.series.get(symbol).ok_or_else(|| PatternError::MarketData {
            symbol: symbol.to_string(),
            reason: "terminal not connected".into(),
        })?;
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }
}

fn trending(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let p = 1.1000 + i as f64 * 0.0005;
            Candle::new(p, p + 0.0004, p - 0.0004, p + 0.0002)
                .with_volume(100.0)
                .with_timestamp(1_700_000_000 + i as i64 * 3600)
        })
        .collect()
}

/// Tight range with rising volume; the last close sits at `last_close`
fn ranging(n: usize, last_close: f64) -> Vec<Candle> {
    let mut bars: Vec<Candle> = (0..n)
        .map(|i| {
            let c = if i % 2 == 0 { 1.0960 } else { 1.1040 };
            let volume = if i + 10 >= n { 200.0 } else { 100.0 };
            Candle::new(c, c + 0.0005, c - 0.0005, c).with_volume(volume)
        })
        .collect();
    if let Some(last) = bars.last_mut() {
        *last = Candle::new(last_close, last_close + 0.0005, last_close - 0.0005, last_close).with_volume(200.0);
    }
    bars
}

#[test]
fn test_unavailable_source_returns_none() {
    let mut analyzer = WyckoffAnalyzer::new(MockFeed::default(), WyckoffConfig::default());
    assert!(analyzer.analyze("EURUSD", Timeframe::H1, 100).is_none());
    assert!(analyzer.events("EURUSD").is_empty());
}

#[test]
fn test_short_history_returns_none() {
    let feed = MockFeed::default().with("EURUSD", trending(30));
    let mut analyzer = WyckoffAnalyzer::new(feed, WyckoffConfig::default());
    assert!(analyzer.analyze("EURUSD", Timeframe::H1, 100).is_none());
}

#[test]
fn test_default_request_size() {
    let feed = MockFeed::default().with("EURUSD", trending(150));
    let mut analyzer = WyckoffAnalyzer::new(feed, WyckoffConfig::default());

    let analysis = analyzer.analyze_default("EURUSD", Timeframe::H4).unwrap();
    assert_eq!(analyzer.source().requested.get(), DEFAULT_BARS);
    assert_eq!(analysis.timeframe, Timeframe::H4);
    assert_eq!(analysis.symbol, "EURUSD");
}

#[test]
fn test_trend_is_markup_without_events() {
    let feed = MockFeed::default().with("EURUSD", trending(100));
    let mut analyzer = WyckoffAnalyzer::new(&feed, WyckoffConfig::default());

    let analysis = analyzer.analyze("EURUSD", Timeframe::H1, 100).unwrap();
    assert_eq!(analysis.phase, WyckoffPhase::Markup);
    assert!(analysis.events.is_empty());
    assert!(analysis.last_point.is_none());
    assert_eq!(analysis.signal.action, WyckoffAction::Wait);
    assert!(!analysis.signal.reasons.is_empty());
    assert!(analysis.atr > 0.0);
    assert!((analysis.volume_ma - 100.0).abs() < 1e-9);
}

#[test]
fn test_accumulation_events_are_cached() {
    let feed = MockFeed::default().with("EURUSD", ranging(100, 1.0970));
    let mut analyzer = WyckoffAnalyzer::new(feed, WyckoffConfig::default());

    let analysis = analyzer.analyze("EURUSD", Timeframe::H1, 100).unwrap();
    assert_eq!(analysis.phase, WyckoffPhase::Accumulation);
    assert!(analysis.reading.position_in_range < 0.4);
    assert_eq!(analyzer.events("EURUSD"), analysis.events.as_slice());

    for event in &analysis.events {
        assert!(matches!(
            event.kind,
            WyckoffEventKind::SellingClimax
                | WyckoffEventKind::AutomaticRally
                | WyckoffEventKind::SecondaryTest
                | WyckoffEventKind::Spring
        ));
    }
    for pair in analysis.events.windows(2) {
        assert!(pair[0].index < pair[1].index);
    }
    assert_ne!(analysis.signal.action, WyckoffAction::Sell);
}

#[test]
fn test_distribution_phase() {
    let analysis =
        analyze_candles(&WyckoffConfig::default(), "EURUSD", Timeframe::M15, &ranging(100, 1.1030)).unwrap();
    assert_eq!(analysis.phase, WyckoffPhase::Distribution);
    assert!(analysis.events.iter().all(|e| matches!(
        e.kind,
        WyckoffEventKind::BuyingClimax
            | WyckoffEventKind::AutomaticReaction
            | WyckoffEventKind::SecondaryTest
            | WyckoffEventKind::Upthrust
    )));
    assert_ne!(analysis.signal.action, WyckoffAction::Buy);
}

#[test]
fn test_analysis_serializes() {
    let analysis =
        analyze_candles(&WyckoffConfig::default(), "EURUSD", Timeframe::D1, &trending(60)).unwrap();
    let json = serde_json::to_value(&analysis).unwrap();
    assert_eq!(json["phase"], "Markup");
    assert_eq!(json["timeframe"], "D1");
    assert_eq!(json["signal"]["action"], "Wait");
}
