//! Bar: the canonical OHLCV record shared by every source.

use super::period::Period;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One OHLCV observation for a symbol.
///
/// `dt` is the bar's **close** time as wall-clock time in the reference
/// timezone (UTC+8). Price and volume fields are optional because some
/// upstream tables omit them; they are never filled with sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub period: Period,
    pub dt: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub vol: Option<f64>,
    pub amount: Option<f64>,
}

impl Bar {
    /// True when every OHLCV field is present.
    pub fn is_complete(&self) -> bool {
        self.open.is_some()
            && self.high.is_some()
            && self.low.is_some()
            && self.close.is_some()
            && self.vol.is_some()
    }

    /// Basic OHLC sanity check. Not enforced; the sync engine logs complete
    /// bars that fail it.
    pub fn is_sane(&self) -> bool {
        let (Some(open), Some(high), Some(low), Some(close)) =
            (self.open, self.high, self.low, self.close)
        else {
            return false;
        };
        high >= open.max(close)
            && low <= open.min(close)
            && self.vol.map_or(true, |v| v >= 0.0)
    }
}

/// A normalized row whose timestamp may be unresolved.
///
/// The normalizer keeps undated rows instead of failing the whole table;
/// [`RawBar::into_bar`] is where they fall away.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub symbol: String,
    pub period: Period,
    pub dt: Option<NaiveDateTime>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub vol: Option<f64>,
    pub amount: Option<f64>,
}

impl RawBar {
    pub fn into_bar(self) -> Option<Bar> {
        Some(Bar {
            dt: self.dt?,
            symbol: self.symbol,
            period: self.period,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            vol: self.vol,
            amount: self.amount,
        })
    }
}

/// Drop duplicate `dt` keeping the **last** occurrence, sorted ascending.
pub fn dedup_keep_last(bars: impl IntoIterator<Item = Bar>) -> Vec<Bar> {
    let mut by_dt: BTreeMap<NaiveDateTime, Bar> = BTreeMap::new();
    for bar in bars {
        by_dt.insert(bar.dt, bar);
    }
    by_dt.into_values().collect()
}

/// Latest `dt` in a series.
pub fn high_water_mark(bars: &[Bar]) -> Option<NaiveDateTime> {
    bars.iter().map(|b| b.dt).max()
}
