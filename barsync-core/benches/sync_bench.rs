//! Criterion benchmarks for the sync hot paths.
//!
//! Benchmarks:
//! 1. Normalizing a Binance-shaped page (alias resolution, shifts, dedup)
//! 2. Normalizing an Eastmoney-shaped string table
//! 3. Merging a fetched window into a cached series

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use barsync_core::data::normalize::{normalize, NormalizeOptions};
use barsync_core::data::{merge_series, SourceClock, StampConvention};
use barsync_core::{Bar, Period};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn price(i: usize) -> f64 {
    100.0 + (i as f64 * 0.1).sin() * 10.0
}

fn kline_page(n: usize) -> DataFrame {
    let start = base().and_utc().timestamp_millis();
    let open_time: Vec<i64> = (0..n as i64).map(|i| start + i * 60_000).collect();
    let close: Vec<f64> = (0..n).map(price).collect();
    df!(
        "open_time" => open_time,
        "open" => close.iter().map(|c| c - 0.3).collect::<Vec<_>>(),
        "high" => close.iter().map(|c| c + 1.5).collect::<Vec<_>>(),
        "low" => close.iter().map(|c| c - 1.5).collect::<Vec<_>>(),
        "close" => close.clone(),
        "volume" => vec![12.5; n],
    )
    .unwrap()
}

fn eastmoney_table(n: usize) -> DataFrame {
    let stamps: Vec<String> = (0..n as i64)
        .map(|i| {
            (base() + Duration::minutes(5 * (i + 1)))
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .collect();
    let text = |f: fn(usize) -> f64| (0..n).map(|i| format!("{:.2}", f(i))).collect::<Vec<_>>();
    df!(
        "时间" => stamps,
        "开盘" => text(|i| price(i) - 0.3),
        "收盘" => text(price),
        "最高" => text(|i| price(i) + 1.5),
        "最低" => text(|i| price(i) - 1.5),
        "成交量" => text(|_| 1200.0),
        "成交额" => text(|i| price(i) * 1200.0),
    )
    .unwrap()
}

fn make_bars(n: usize, offset_hours: i64, close: f64) -> Vec<Bar> {
    (0..n as i64)
        .map(|i| Bar {
            symbol: "BENCH".to_string(),
            period: Period::H1,
            dt: base() + Duration::hours(offset_hours + i),
            open: Some(close),
            high: Some(close + 1.0),
            low: Some(close - 1.0),
            close: Some(close),
            vol: Some(10.0),
            amount: Some(10.0 * close),
        })
        .collect()
}

// ── 1/2. Normalizer ──────────────────────────────────────────────────

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for &rows in &[1000, 10_000] {
        let page = kline_page(rows);
        let opts = NormalizeOptions {
            symbol: "BTCUSDT",
            period: Period::M1,
            interval: "1m",
            stamps: StampConvention::OpenTime,
            clock: SourceClock::Utc,
        };
        group.bench_with_input(BenchmarkId::new("binance_klines", rows), &rows, |b, _| {
            b.iter(|| normalize(black_box(&page), black_box(&opts)).unwrap());
        });

        let table = eastmoney_table(rows);
        let opts = NormalizeOptions {
            symbol: "600519",
            period: Period::M5,
            interval: "5",
            stamps: StampConvention::CloseTime,
            clock: SourceClock::Reference,
        };
        group.bench_with_input(BenchmarkId::new("eastmoney_text", rows), &rows, |b, _| {
            b.iter(|| normalize(black_box(&table), black_box(&opts)).unwrap());
        });
    }

    group.finish();
}

// ── 3. Merge ─────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_merge");

    for &cached in &[8760, 52_560] {
        let existing = make_bars(cached, 0, 1.0);
        // A resumed window: one day of overlap plus one day of new bars.
        let fresh = make_bars(48, cached as i64 - 24, 2.0);
        group.bench_with_input(
            BenchmarkId::new("resume_window", cached),
            &cached,
            |b, _| {
                b.iter(|| merge_series(black_box(existing.clone()), black_box(fresh.clone())));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_merge);
criterion_main!(benches);
