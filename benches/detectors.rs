//! Benchmarks for smart-money detection and Wyckoff analysis.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use smcd::prelude::*;
use smcd::wyckoff::analyze_candles;

/// Simple test bar structure
#[derive(Debug, Clone, Copy)]
struct TestBar {
  o: f64,
  h: f64,
  l: f64,
  c: f64,
  v: f64,
}

impl OHLCV for TestBar {
  fn open(&self) -> f64 {
    self.o
  }

  fn high(&self) -> f64 {
    self.h
  }

  fn low(&self) -> f64 {
    self.l
  }

  fn close(&self) -> f64 {
    self.c
  }

  fn volume(&self) -> f64 {
    self.v
  }
}

/// Generate realistic forex-scale bars
fn generate_bars(n: usize) -> Vec<TestBar> {
  let mut bars = Vec::with_capacity(n);
  let mut price = 1.1000;

  for i in 0..n {
    let change = (((i * 7 + 13) % 100) as f64 / 50.0 - 1.0) * 0.0008; // Deterministic "random"
    let volatility = (2.0 + ((i * 3) % 10) as f64 / 5.0) * 0.0002;

    let o = price;
    let c = price + change;
    let h = o.max(c) + volatility * 0.5;
    let l = o.min(c) - volatility * 0.5;
    let v = 800.0 + ((i * 11) % 17) as f64 * 60.0;

    bars.push(TestBar { o, h, l, c, v });
    price = c;
  }

  bars
}

/// Engine whose detectors all look back over `lookback` candles
fn engine_with_lookback(lookback: usize) -> SmcEngine {
  let period = Period::new(lookback).unwrap();
  let mut config = SmcConfig::default();
  config.order_block.lookback = period;
  config.fair_value_gap.lookback = period;
  config.liquidity_sweep.lookback = period;
  config.market_structure.lookback = period;
  EngineBuilder::new().config(config).build().unwrap()
}

fn bench_single_detectors(c: &mut Criterion) {
  let bars = generate_bars(150);

  let order_blocks = OrderBlockDetector::default();
  c.bench_function("order_block_scan_150_bars", |b| {
    b.iter(|| black_box(order_blocks.scan(black_box(&bars), "EURUSD")))
  });

  let gaps = FairValueGapDetector::default();
  c.bench_function("fair_value_gap_scan_150_bars", |b| {
    b.iter(|| black_box(gaps.scan(black_box(&bars), "EURUSD")))
  });

  let sweeps = LiquiditySweepDetector::default();
  c.bench_function("liquidity_sweep_scan_150_bars", |b| {
    b.iter(|| black_box(sweeps.scan(black_box(&bars), "EURUSD")))
  });

  let structure = MarketStructureDetector::default();
  c.bench_function("market_structure_scan_150_bars", |b| {
    b.iter(|| black_box(structure.scan(black_box(&bars), "EURUSD")))
  });
}

fn bench_engine(c: &mut Criterion) {
  let bars = generate_bars(150);
  let mut engine = EngineBuilder::new().build().unwrap();

  c.bench_function("engine_analyze_150_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.analyze("EURUSD", black_box(&bars)));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let mut group = c.benchmark_group("scaling");

  for size in [50, 150, 500, 1000, 5000].iter() {
    let bars = generate_bars(*size);
    let engine = engine_with_lookback(*size);

    group.bench_with_input(BenchmarkId::new("scan", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(engine.scan("EURUSD", black_box(&bars)));
      })
    });
  }

  group.finish();
}

fn bench_parallel_scan(c: &mut Criterion) {
  let bars1 = generate_bars(500);
  let bars2 = generate_bars(500);
  let bars3 = generate_bars(500);
  let bars4 = generate_bars(500);

  let engine = engine_with_lookback(500);

  let instruments: Vec<(&str, &[TestBar])> =
    vec![("EURUSD", &bars1), ("GBPUSD", &bars2), ("USDJPY", &bars3), ("AUDUSD", &bars4)];

  c.bench_function("parallel_scan_4_instruments", |b| {
    b.iter(|| {
      let _ = black_box(scan_parallel(black_box(&engine), black_box(instruments.clone())));
    })
  });
}

fn bench_wyckoff(c: &mut Criterion) {
  let bars = generate_bars(100);
  let config = WyckoffConfig::default();

  c.bench_function("wyckoff_analyze_100_bars", |b| {
    b.iter(|| black_box(analyze_candles(&config, "EURUSD", Timeframe::H1, black_box(&bars))))
  });
}

criterion_group!(
  benches,
  bench_single_detectors,
  bench_engine,
  bench_scaling,
  bench_parallel_scan,
  bench_wyckoff,
);

criterion_main!(benches);
