//! Parquet cache of synced bars.
//!
//! Layout: `{root}/{source}/{symbol}_{period}_{bucket:%Y%m%d}.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Idempotent merge: new rows replace cached rows at the same `dt`
//! - Schema validation on read, quarantine for corrupt files
//! - Metadata sidecar per file (hash, dt range, row count)

use super::provider::DataError;
use super::schema::BarSchema;
use crate::clock::{Clock, SystemClock};
use crate::domain::{dedup_keep_last, file_safe_symbol, Bar, Period};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Fixed lookback when resuming from a cached series.
pub fn resume_lookback() -> Duration {
    Duration::days(1)
}

/// Identifies one cache file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub symbol: String,
    pub period: Period,
    /// Calendar date of the requested start.
    pub bucket: NaiveDate,
}

impl CacheKey {
    pub fn new(source: &str, symbol: &str, period: Period, bucket: NaiveDate) -> Self {
        Self {
            source: source.to_string(),
            symbol: symbol.to_string(),
            period,
            bucket,
        }
    }

    fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.parquet",
            file_safe_symbol(&self.symbol),
            self.period,
            self.bucket.format("%Y%m%d")
        )
    }
}

/// Metadata sidecar for a cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub period: Period,
    pub bucket: NaiveDate,
    pub first_dt: NaiveDateTime,
    pub last_dt: NaiveDateTime,
    pub bar_count: usize,
    pub data_hash: String,
    pub source: String,
    pub cached_at: NaiveDateTime,
}

/// Cache status for a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub source: String,
    pub symbol: String,
    pub period: Period,
    pub bucket: NaiveDate,
    pub rows: usize,
    pub first_dt: NaiveDateTime,
    pub last_dt: NaiveDateTime,
}

/// Concatenate, keep the last row per `dt`, sort ascending.
pub fn merge_series(existing: Vec<Bar>, new_rows: Vec<Bar>) -> Vec<Bar> {
    dedup_keep_last(existing.into_iter().chain(new_rows))
}

/// Where the next upstream window starts.
pub fn resume_point(high_water_mark: Option<NaiveDateTime>, start: NaiveDateTime) -> NaiveDateTime {
    match high_water_mark {
        Some(hwm) => hwm - resume_lookback(),
        None => start,
    }
}

/// The Parquet cache.
#[derive(Debug, Clone)]
pub struct BarCache {
    root: PathBuf,
}

impl BarCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.source).join(key.file_name())
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.path(key).with_extension("meta.json")
    }

    /// Load the cached series for `key`.
    ///
    /// A missing file is an empty series. A file that fails to decode or
    /// validate is renamed to `*.parquet.quarantined` and also reads as empty.
    /// Any other I/O failure is a `CacheError` and leaves the file alone.
    pub fn read(&self, key: &CacheKey) -> Result<Vec<Bar>, DataError> {
        let path = self.path(key);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DataError::CacheError(format!(
                    "open {}: {e}",
                    path.display()
                )))
            }
        };

        match decode_and_validate(file, key.period) {
            Ok(bars) => Ok(dedup_keep_last(bars)),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt cache file"
                );
                fs::rename(&path, &quarantine)
                    .map_err(|e| DataError::CacheError(format!("quarantine failed: {e}")))?;
                Ok(Vec::new())
            }
        }
    }

    /// Merge `new_rows` into `existing`, persist the result and return it.
    ///
    /// An empty result is returned without touching disk.
    pub fn merge(
        &self,
        key: &CacheKey,
        existing: Vec<Bar>,
        new_rows: Vec<Bar>,
    ) -> Result<Vec<Bar>, DataError> {
        let merged = merge_series(existing, new_rows);
        if merged.is_empty() {
            return Ok(merged);
        }
        self.write(key, &merged)?;
        Ok(merged)
    }

    /// Atomically replace the file for `key` with `bars` and refresh the sidecar.
    fn write(&self, key: &CacheKey, bars: &[Bar]) -> Result<(), DataError> {
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Err(DataError::CacheError("no bars to cache".into()));
        };

        let path = self.path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;
        }

        let mut df = bars_to_dataframe(bars)?;
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;

        let meta = CacheMeta {
            symbol: key.symbol.clone(),
            period: key.period,
            bucket: key.bucket,
            first_dt: first.dt,
            last_dt: last.dt,
            bar_count: bars.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(bars)
                    .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source: key.source.clone(),
            cached_at: SystemClock.now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(key), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        tracing::debug!(
            path = %path.display(),
            rows = bars.len(),
            "cache file written"
        );
        Ok(())
    }

    pub fn get_meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// One entry per cached file, read from the sidecars.
    pub fn status(&self) -> Result<Vec<CacheStatus>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for source_dir in read_dir(&self.root)? {
            if !source_dir.is_dir() {
                continue;
            }
            for path in read_dir(&source_dir)? {
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".meta.json"));
                if !is_meta {
                    continue;
                }
                let meta: CacheMeta = match fs::read_to_string(&path)
                    .ok()
                    .and_then(|c| serde_json::from_str(&c).ok())
                {
                    Some(meta) => meta,
                    None => {
                        tracing::warn!(path = %path.display(), "unreadable cache sidecar");
                        continue;
                    }
                };
                out.push(CacheStatus {
                    source: meta.source,
                    symbol: meta.symbol,
                    period: meta.period,
                    bucket: meta.bucket,
                    rows: meta.bar_count,
                    first_dt: meta.first_dt,
                    last_dt: meta.last_dt,
                });
            }
        }

        out.sort_by(|a, b| {
            (&a.source, &a.symbol, a.period, a.bucket).cmp(&(&b.source, &b.symbol, b.period, b.bucket))
        });
        Ok(out)
    }
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    fs::read_dir(dir)
        .map_err(|e| DataError::CacheError(format!("read dir {}: {e}", dir.display())))?
        .map(|entry| {
            entry
                .map(|e| e.path())
                .map_err(|e| DataError::CacheError(format!("dir entry: {e}")))
        })
        .collect()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Bars as a table in the persisted column layout.
pub fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, DataError> {
    let dts: Vec<i64> = bars
        .iter()
        .map(|b| b.dt.and_utc().timestamp_millis())
        .collect();
    let column = |name: &str, get: fn(&Bar) -> Option<f64>| {
        Column::new(name.into(), bars.iter().map(get).collect::<Vec<_>>())
    };
    let symbols: Vec<&str> = bars.iter().map(|b| b.symbol.as_str()).collect();

    DataFrame::new(vec![
        Column::new("dt".into(), dts)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| DataError::ParquetError(format!("dt cast: {e}")))?,
        column("open", |b| b.open),
        column("high", |b| b.high),
        column("low", |b| b.low),
        column("close", |b| b.close),
        column("vol", |b| b.vol),
        column("amount", |b| b.amount),
        Column::new("symbol".into(), symbols),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn decode_and_validate(file: fs::File, period: Period) -> Result<Vec<Bar>, DataError> {
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    BarSchema::validate(&df).map_err(|e| DataError::ValidationError(e.to_string()))?;
    dataframe_to_bars(&df, period)
}

/// Read a table in the persisted layout back into bars.
pub fn dataframe_to_bars(df: &DataFrame, period: Period) -> Result<Vec<Bar>, DataError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))
    };
    let floats = |name: &str| -> Result<Vec<Option<f64>>, DataError> {
        Ok(column(name)?
            .f64()
            .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?
            .into_iter()
            .collect())
    };

    let dt_ms = column("dt")?
        .cast(&DataType::Int64)
        .map_err(|e| DataError::ParquetError(format!("dt cast: {e}")))?;
    let dt_ca = dt_ms
        .i64()
        .map_err(|e| DataError::ParquetError(format!("dt column type: {e}")))?;
    let symbols = column("symbol")?;
    let symbol_ca = symbols
        .str()
        .map_err(|e| DataError::ParquetError(format!("symbol column type: {e}")))?;

    let open = floats("open")?;
    let high = floats("high")?;
    let low = floats("low")?;
    let close = floats("close")?;
    let vol = floats("vol")?;
    let amount = floats("amount")?;

    let mut bars = Vec::with_capacity(df.height());
    for (i, (ms, symbol)) in dt_ca.into_iter().zip(symbol_ca).enumerate() {
        let dt = ms
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| DataError::ValidationError(format!("null dt at row {i}")))?;
        bars.push(Bar {
            symbol: symbol.unwrap_or_default().to_string(),
            period,
            dt,
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            vol: vol[i],
            amount: amount[i],
        });
    }
    Ok(bars)
}
