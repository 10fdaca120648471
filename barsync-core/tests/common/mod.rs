//! Shared fixtures for integration tests: an in-memory upstream that serves
//! Binance-shaped pages from a fixed list of rows.

#![allow(dead_code)]

use barsync_core::data::{
    BarSource, DataError, PageRequest, RawPage, SourceClock, SourceProfile, StampConvention,
};
use barsync_core::{Period, SymbolInfo};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;

/// Epoch milliseconds of a UTC wall-clock time.
pub fn utc_ms(y: i32, m: u32, d: u32, h: u32) -> i64 {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

/// Reference (UTC+8) wall-clock time.
pub fn reference(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

/// `count` hourly rows starting at `first_open_ms`, all with the same close.
pub fn hourly_rows(first_open_ms: i64, count: usize, close: f64) -> Vec<(i64, f64)> {
    (0..count as i64)
        .map(|i| (first_open_ms + i * 3_600_000, close))
        .collect()
}

/// Serves `(open_time_ms, close)` rows in pages, like the klines endpoint.
pub struct ScriptedSource {
    rows: Vec<(i64, f64)>,
    page_size: usize,
    periods: HashSet<Period>,
    /// 1-based request number that fails with `failure`.
    fail_on: Option<(usize, fn() -> DataError)>,
    requests: Mutex<Vec<(i64, i64)>>,
}

impl ScriptedSource {
    pub fn new(rows: Vec<(i64, f64)>, page_size: usize) -> Self {
        Self {
            rows,
            page_size,
            periods: Period::ALL.iter().copied().collect(),
            fail_on: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, request: usize, failure: fn() -> DataError) -> Self {
        self.fail_on = Some((request, failure));
        self
    }

    pub fn only_periods(mut self, periods: &[Period]) -> Self {
        self.periods = periods.iter().copied().collect();
        self
    }

    /// `(since_ms, until_ms)` of every request so far.
    pub fn requests(&self) -> Vec<(i64, i64)> {
        self.requests.lock().unwrap().clone()
    }
}

impl BarSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            stamps: StampConvention::OpenTime,
            clock: SourceClock::Utc,
            page_limit: self.page_size,
        }
    }

    fn interval_token(&self, period: Period) -> Result<&'static str, DataError> {
        if self.periods.contains(&period) {
            Ok(period.as_str())
        } else {
            Err(DataError::unsupported(period, self.name()))
        }
    }

    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<RawPage, DataError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push((request.since_ms, request.until_ms));
            requests.len()
        };
        if let Some((n, failure)) = self.fail_on {
            if n == call {
                return Err(failure());
            }
        }

        let page: Vec<(i64, f64)> = self
            .rows
            .iter()
            .copied()
            .filter(|(t, _)| *t >= request.since_ms && *t <= request.until_ms)
            .take(request.limit.min(self.page_size))
            .collect();
        let last = page.iter().map(|(t, _)| *t).max();
        let open_time: Vec<i64> = page.iter().map(|(t, _)| *t).collect();
        let close: Vec<f64> = page.iter().map(|(_, c)| *c).collect();
        let frame = df!(
            "open_time" => open_time,
            "open" => close.clone(),
            "high" => close.clone(),
            "low" => close.clone(),
            "close" => close,
            "volume" => vec![1.0; page.len()],
        )
        .unwrap();
        Ok(RawPage::new(frame, last))
    }

    fn list_symbols(&self) -> Result<Vec<SymbolInfo>, DataError> {
        Ok(vec![SymbolInfo::new("BTCUSDT")])
    }
}
