//! Normalizer: turns an upstream table into canonical bars.
//!
//! Upstream tables disagree on everything: column names (Chinese, latinized,
//! canonical), timestamp encoding (epoch ms, datetime, strings), timezone
//! (UTC or UTC+8) and which edge of the interval a timestamp names. This
//! module resolves all of that through a static alias table and a pair of
//! fixed shifts, and never fails on a partial schema: missing columns become
//! `None`.

use super::provider::{DataError, SourceClock, StampConvention};
use crate::clock::reference_offset;
use crate::domain::{Period, RawBar};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Canonical bar fields a column can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarField {
    Dt,
    Open,
    High,
    Low,
    Close,
    Vol,
    Amount,
}

/// Upstream column name → canonical field. For each field the first alias
/// present in a table wins.
pub const COLUMN_ALIASES: &[(&str, BarField)] = &[
    ("dt", BarField::Dt),
    ("时间", BarField::Dt),
    ("日期", BarField::Dt),
    ("datetime", BarField::Dt),
    ("date", BarField::Dt),
    ("day", BarField::Dt),
    ("timestamp", BarField::Dt),
    ("open_time", BarField::Dt),
    ("open", BarField::Open),
    ("开盘", BarField::Open),
    ("high", BarField::High),
    ("最高", BarField::High),
    ("low", BarField::Low),
    ("最低", BarField::Low),
    ("close", BarField::Close),
    ("收盘", BarField::Close),
    ("vol", BarField::Vol),
    ("volume", BarField::Vol),
    ("成交量", BarField::Vol),
    ("amount", BarField::Amount),
    ("成交额", BarField::Amount),
];

/// Columns holding a serialized row index (pandas writes `__index_level_0__`).
const INDEX_COLUMNS: &[&str] = &["__index_level_0__", "index"];

const STAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// How to read one upstream table.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions<'a> {
    pub symbol: &'a str,
    pub period: Period,
    /// Source-specific interval token; keys the close-time shift.
    pub interval: &'a str,
    pub stamps: StampConvention,
    pub clock: SourceClock,
}

/// First column of `df` that resolves to `field`.
pub fn resolve_column(df: &DataFrame, field: BarField) -> Option<&Column> {
    COLUMN_ALIASES
        .iter()
        .filter(|(_, f)| *f == field)
        .find_map(|(name, _)| df.column(name).ok())
}

/// Shift that turns an open-time stamp into a close-time stamp.
/// Daily and unknown tokens are left alone.
pub fn close_shift(interval: &str) -> Option<Duration> {
    match interval {
        "1m" => Some(Duration::minutes(1)),
        "5m" => Some(Duration::minutes(5)),
        "15m" => Some(Duration::minutes(15)),
        "30m" => Some(Duration::minutes(30)),
        "1h" => Some(Duration::hours(1)),
        "2h" => Some(Duration::hours(2)),
        "4h" => Some(Duration::hours(4)),
        _ => None,
    }
}

/// Time between a normalized `dt` and the moment the bar is complete.
///
/// Zero when `dt` already names the close. Daily bars keep the stamp of
/// their start (an unshifted open time, or a bare trading date), so they
/// complete one period later.
pub fn completion_lag(period: Period, interval: &str, stamps: StampConvention) -> Duration {
    let names_close = match stamps {
        StampConvention::OpenTime => close_shift(interval).is_some(),
        StampConvention::CloseTime => period.is_intraday(),
    };
    if names_close {
        Duration::zero()
    } else {
        period.duration()
    }
}

/// Notional when the source omits it: `vol * close`, only if both exist.
pub fn synthesize_amount(vol: Option<f64>, close: Option<f64>) -> Option<f64> {
    Some(vol? * close?)
}

/// Parse a wall-clock timestamp string in any of the known upstream formats.
pub fn parse_stamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    STAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Normalize one upstream table into rows for `opts.symbol`.
///
/// Output is deduplicated on `dt` (last occurrence wins) and sorted
/// ascending; rows whose timestamp could not be resolved come last.
pub fn normalize(df: &DataFrame, opts: &NormalizeOptions<'_>) -> Result<Vec<RawBar>, DataError> {
    let n = df.height();
    if n == 0 {
        return Ok(Vec::new());
    }

    let stamps = match resolve_column(df, BarField::Dt) {
        Some(col) => column_stamps(col)?,
        None => index_stamps(df),
    };

    let open = floats(resolve_column(df, BarField::Open), n)?;
    let high = floats(resolve_column(df, BarField::High), n)?;
    let low = floats(resolve_column(df, BarField::Low), n)?;
    let close = floats(resolve_column(df, BarField::Close), n)?;
    let vol = floats(resolve_column(df, BarField::Vol), n)?;
    let amount = match resolve_column(df, BarField::Amount) {
        Some(col) => floats(Some(col), n)?,
        None => vol
            .iter()
            .zip(&close)
            .map(|(v, c)| synthesize_amount(*v, *c))
            .collect(),
    };

    let mut offset = Duration::zero();
    if opts.stamps == StampConvention::OpenTime {
        offset += close_shift(opts.interval).unwrap_or_else(Duration::zero);
    }
    if opts.clock == SourceClock::Utc {
        offset += reference_offset();
    }

    let rows = (0..n).map(|i| RawBar {
        symbol: opts.symbol.to_string(),
        period: opts.period,
        dt: stamps[i].map(|t| t + offset),
        open: open[i],
        high: high[i],
        low: low[i],
        close: close[i],
        vol: vol[i],
        amount: amount[i],
    });

    Ok(dedup_rows(rows))
}

/// Last occurrence per `dt` wins; undated rows collapse the same way.
fn dedup_rows(rows: impl Iterator<Item = RawBar>) -> Vec<RawBar> {
    let mut dated: BTreeMap<NaiveDateTime, RawBar> = BTreeMap::new();
    let mut undated = None;
    for row in rows {
        match row.dt {
            Some(dt) => {
                dated.insert(dt, row);
            }
            None => undated = Some(row),
        }
    }
    dated.into_values().chain(undated).collect()
}

fn floats(col: Option<&Column>, n: usize) -> Result<Vec<Option<f64>>, DataError> {
    let Some(col) = col else {
        return Ok(vec![None; n]);
    };
    let cast = col
        .cast(&DataType::Float64)
        .map_err(|e| DataError::Normalize(format!("column '{}' as float: {e}", col.name())))?;
    let values = cast
        .f64()
        .map_err(|e| DataError::Normalize(format!("column '{}' type: {e}", col.name())))?;
    Ok(values.into_iter().collect())
}

/// Timestamps as naive wall-clock time in the source's own clock.
fn column_stamps(col: &Column) -> Result<Vec<Option<NaiveDateTime>>, DataError> {
    let n = col.len();
    let stamps = match col.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            integers(col)?
                .into_iter()
                .map(|v| v.and_then(|v| from_epoch(v, unit)))
                .collect()
        }
        DataType::Date => integers(col)?
            .into_iter()
            .map(|v| {
                v.and_then(|days| {
                    NaiveDate::from_ymd_opt(1970, 1, 1)
                        .and_then(|epoch| epoch.checked_add_signed(Duration::days(days)))
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
            })
            .collect(),
        DataType::String => col
            .str()
            .map_err(|e| DataError::Normalize(format!("timestamp column: {e}")))?
            .into_iter()
            .map(|v| v.and_then(parse_stamp))
            .collect(),
        dtype if dtype.is_integer() => integers(col)?
            .into_iter()
            .map(|v| v.and_then(|ms| from_epoch(ms, TimeUnit::Milliseconds)))
            .collect(),
        other => {
            tracing::warn!(column = %col.name(), dtype = ?other, "unreadable timestamp column");
            vec![None; n]
        }
    };
    Ok(stamps)
}

/// Fall back to a serialized row index; all-`None` when there is none.
fn index_stamps(df: &DataFrame) -> Vec<Option<NaiveDateTime>> {
    let from_index = INDEX_COLUMNS
        .iter()
        .find_map(|name| df.column(name).ok())
        .and_then(|col| column_stamps(col).ok());
    match from_index {
        Some(stamps) => stamps,
        None => {
            tracing::warn!(
                rows = df.height(),
                "no timestamp column or index; rows kept undated"
            );
            vec![None; df.height()]
        }
    }
}

fn integers(col: &Column) -> Result<Vec<Option<i64>>, DataError> {
    let cast = col
        .cast(&DataType::Int64)
        .map_err(|e| DataError::Normalize(format!("column '{}' as integer: {e}", col.name())))?;
    let values = cast
        .i64()
        .map_err(|e| DataError::Normalize(format!("column '{}' type: {e}", col.name())))?;
    Ok(values.into_iter().collect())
}

fn from_epoch(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
    };
    dt.map(|dt| dt.naive_utc())
}
