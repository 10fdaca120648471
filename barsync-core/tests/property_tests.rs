//! Property tests for cache-merge and normalizer invariants.
//!
//! Uses proptest to verify:
//! 1. Merge idempotence: merging the same rows twice equals merging once
//! 2. Persisted order: merged series have unique, strictly ascending `dt`
//! 3. Last write wins: a merged row carries the newest value for its `dt`
//! 4. Normalizer dedup and close-time shift

use barsync_core::data::normalize::{close_shift, normalize, synthesize_amount, NormalizeOptions};
use barsync_core::data::{merge_series, SourceClock, StampConvention};
use barsync_core::{Bar, Period};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn bar(hour: i64, close: f64) -> Bar {
    Bar {
        symbol: "BTCUSDT".into(),
        period: Period::H1,
        dt: base() + Duration::hours(hour),
        open: Some(close),
        high: Some(close),
        low: Some(close),
        close: Some(close),
        vol: Some(1.0),
        amount: Some(close),
    }
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_close() -> impl Strategy<Value = f64> {
    (1.0..1000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_series() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((0..240i64, arb_close()), 0..60)
        .prop_map(|rows| rows.into_iter().map(|(h, c)| bar(h, c)).collect())
}

fn arb_intraday() -> impl Strategy<Value = Period> {
    prop::sample::select(vec![
        Period::M1,
        Period::M5,
        Period::M15,
        Period::M30,
        Period::H1,
        Period::H2,
        Period::H4,
    ])
}

// ── 1. Merge idempotence ─────────────────────────────────────────────

proptest! {
    #[test]
    fn merging_twice_equals_merging_once(existing in arb_series(), new_rows in arb_series()) {
        let once = merge_series(existing, new_rows.clone());
        let twice = merge_series(once.clone(), new_rows);
        prop_assert_eq!(once, twice);
    }
}

// ── 2. Persisted order ───────────────────────────────────────────────

proptest! {
    #[test]
    fn merged_series_is_strictly_ascending(existing in arb_series(), new_rows in arb_series()) {
        let expected: BTreeSet<NaiveDateTime> =
            existing.iter().chain(&new_rows).map(|b| b.dt).collect();
        let merged = merge_series(existing, new_rows);

        prop_assert!(merged.windows(2).all(|w| w[0].dt < w[1].dt));
        prop_assert_eq!(merged.len(), expected.len());
    }
}

// ── 3. Last write wins ───────────────────────────────────────────────

proptest! {
    #[test]
    fn newest_row_wins(existing in arb_series(), new_rows in arb_series()) {
        let mut latest: BTreeMap<NaiveDateTime, Option<f64>> = BTreeMap::new();
        for b in existing.iter().chain(&new_rows) {
            latest.insert(b.dt, b.close);
        }
        let merged = merge_series(existing, new_rows);

        for b in &merged {
            prop_assert_eq!(Some(&b.close), latest.get(&b.dt));
        }
    }
}

// ── 4. Normalizer ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn normalized_rows_are_unique_and_sorted(offsets in prop::collection::vec(0..500i64, 1..80)) {
        let start_ms = base().and_utc().timestamp_millis();
        let stamps: Vec<i64> = offsets.iter().map(|o| start_ms + o * 60_000).collect();
        let closes: Vec<f64> = (0..stamps.len()).map(|i| i as f64).collect();
        let df = df!("open_time" => stamps.clone(), "close" => closes).unwrap();

        let opts = NormalizeOptions {
            symbol: "BTCUSDT",
            period: Period::M1,
            interval: "1m",
            stamps: StampConvention::OpenTime,
            clock: SourceClock::Utc,
        };
        let rows = normalize(&df, &opts).unwrap();

        let distinct: BTreeSet<i64> = stamps.iter().copied().collect();
        prop_assert_eq!(rows.len(), distinct.len());
        prop_assert!(rows.windows(2).all(|w| w[0].dt < w[1].dt));

        // The last occurrence of each stamp supplies the row.
        let mut last_index: BTreeMap<i64, usize> = BTreeMap::new();
        for (i, s) in stamps.iter().enumerate() {
            last_index.insert(*s, i);
        }
        for (row, (_, idx)) in rows.iter().zip(&last_index) {
            prop_assert_eq!(row.close, Some(*idx as f64));
        }
    }

    #[test]
    fn open_time_becomes_close_time(minutes in 0..100_000i64, period in arb_intraday()) {
        let open_ms = base().and_utc().timestamp_millis() + minutes * 60_000;
        let df = df!("open_time" => [open_ms], "close" => [1.0]).unwrap();
        let opts = NormalizeOptions {
            symbol: "X",
            period,
            interval: period.as_str(),
            stamps: StampConvention::OpenTime,
            clock: SourceClock::Reference,
        };
        let rows = normalize(&df, &opts).unwrap();

        let open = DateTime::from_timestamp_millis(open_ms).unwrap().naive_utc();
        prop_assert_eq!(close_shift(period.as_str()), Some(period.duration()));
        prop_assert_eq!(rows[0].dt, Some(open + period.duration()));
    }

    #[test]
    fn amount_is_vol_times_close(vol in 0.0..1e6_f64, close in arb_close()) {
        prop_assert_eq!(synthesize_amount(Some(vol), Some(close)), Some(vol * close));
        prop_assert_eq!(synthesize_amount(None, Some(close)), None);
    }
}
