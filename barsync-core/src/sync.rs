//! Sync orchestrator: cache-aware incremental fetch.
//!
//! A sync reads the cached series for `(source, symbol, period, start)`,
//! fetches only the window after its high-water mark (minus a one-day
//! lookback), normalizes, drops bars that have not closed yet, merges into
//! the cache and returns the part of the series after the requested start.

use crate::clock::{reference_to_epoch_ms, Clock};
use crate::data::cache::{resume_point, BarCache, CacheKey};
use crate::data::normalize::{completion_lag, normalize, NormalizeOptions};
use crate::data::paginate::Paginator;
use crate::data::provider::{BarSource, DataError};
use crate::domain::{high_water_mark, Bar, Period, SymbolInfo};
use crate::settings::SyncSettings;
use chrono::NaiveDateTime;
use std::path::PathBuf;

/// Outcome of one [`SyncEngine::sync`] call.
#[derive(Debug)]
pub struct SyncReport {
    pub symbol: String,
    pub period: Period,
    /// Rows with `dt` after the requested start.
    pub bars: Vec<Bar>,
    /// Closed, dated rows fetched from upstream this run.
    pub fetched: usize,
    pub pages: usize,
    /// Transport failure that cut pagination short.
    pub stopped_by: Option<DataError>,
    pub cache_path: PathBuf,
    /// Rows in the cache file after the sync.
    pub cached_rows: usize,
}

impl SyncReport {
    pub fn is_partial(&self) -> bool {
        self.stopped_by.is_some()
    }
}

/// Parameters of an uncached fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub symbol: String,
    pub period: Period,
    pub start: NaiveDateTime,
    /// Defaults to now.
    pub end: Option<NaiveDateTime>,
}

/// Closed bars from one upstream window.
struct Window {
    bars: Vec<Bar>,
    pages: usize,
    stopped_by: Option<DataError>,
}

/// Paginate, normalize, then keep only dated bars that have closed by `now`.
/// Daily bars stamped with their start close one period after `dt`.
///
/// A non-transient failure before any page arrived is returned as the error;
/// any other failure truncates the window.
fn fetch_window(
    source: &dyn BarSource,
    settings: &SyncSettings,
    symbol: &str,
    period: Period,
    since: NaiveDateTime,
    until: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<Window, DataError> {
    let interval = source.interval_token(period)?;
    let profile = source.profile();

    let paged = Paginator::new(profile.page_limit, settings.page_delay())
        .with_max_pages(settings.max_pages)
        .fetch_window(
            source,
            symbol,
            interval,
            reference_to_epoch_ms(since),
            reference_to_epoch_ms(until),
        );

    let stopped_by = match paged.stopped_by {
        Some(e) if paged.pages == 0 && !e.is_transient() => return Err(e),
        other => other,
    };

    let opts = NormalizeOptions {
        symbol,
        period,
        interval,
        stamps: profile.stamps,
        clock: profile.clock,
    };
    let rows = normalize(&paged.frame, &opts)?;

    let total = rows.len();
    let dated: Vec<Bar> = rows.into_iter().filter_map(|r| r.into_bar()).collect();
    if dated.len() < total {
        tracing::warn!(
            symbol,
            period = %period,
            dropped = total - dated.len(),
            "dropping rows without a resolvable timestamp"
        );
    }

    let suspicious = dated
        .iter()
        .filter(|b| b.is_complete() && !b.is_sane())
        .count();
    if suspicious > 0 {
        tracing::warn!(
            symbol,
            period = %period,
            rows = suspicious,
            "bars with inconsistent OHLC values"
        );
    }

    // A bar is persisted only once it has closed.
    let lag = completion_lag(period, interval, profile.stamps);
    let before = dated.len();
    let bars: Vec<Bar> = dated.into_iter().filter(|b| b.dt + lag <= now).collect();
    if bars.len() < before {
        tracing::debug!(
            symbol,
            period = %period,
            dropped = before - bars.len(),
            "dropping bars that have not closed"
        );
    }

    Ok(Window {
        bars,
        pages: paged.pages,
        stopped_by,
    })
}

/// Binds a source, a cache and a clock for repeated syncs.
pub struct SyncEngine<'a> {
    source: &'a dyn BarSource,
    cache: &'a BarCache,
    clock: &'a dyn Clock,
    settings: SyncSettings,
}

impl<'a> SyncEngine<'a> {
    pub fn new(source: &'a dyn BarSource, cache: &'a BarCache, clock: &'a dyn Clock) -> Self {
        Self {
            source,
            cache,
            clock,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn cache_key(&self, symbol: &str, period: Period, start: NaiveDateTime) -> CacheKey {
        CacheKey::new(self.source.name(), symbol, period, start.date())
    }

    /// Bring the cache for `symbol`/`period`/`start` up to date and return
    /// every cached row after `start`.
    pub fn sync(
        &self,
        symbol: &str,
        period: Period,
        start: Option<NaiveDateTime>,
    ) -> Result<SyncReport, DataError> {
        // Fail fast before touching the cache.
        self.source.interval_token(period)?;
        if !self.source.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let sdt = start.unwrap_or_else(|| self.settings.default_start_dt());
        let key = self.cache_key(symbol, period, sdt);
        let cached = self.cache.read(&key)?;
        let hwm = high_water_mark(&cached);
        let since = resume_point(hwm, sdt);
        let now = self.clock.now();
        let until = now + self.settings.forward_skew();

        tracing::info!(
            source = self.source.name(),
            symbol,
            period = %period,
            cached = cached.len(),
            since = %since,
            "sync started"
        );

        let window = fetch_window(
            self.source,
            &self.settings,
            symbol,
            period,
            since,
            until,
            now,
        )?;
        let fetched = window.bars.len();

        let series = if fetched > 0 {
            self.cache.merge(&key, cached, window.bars)?
        } else {
            tracing::info!(symbol, period = %period, "no new data");
            cached
        };
        let cached_rows = series.len();
        let bars: Vec<Bar> = series.into_iter().filter(|b| b.dt > sdt).collect();

        tracing::info!(
            symbol,
            period = %period,
            rows = bars.len(),
            fetched,
            pages = window.pages,
            partial = window.stopped_by.is_some(),
            "sync finished"
        );

        Ok(SyncReport {
            symbol: symbol.to_string(),
            period,
            bars,
            fetched,
            pages: window.pages,
            stopped_by: window.stopped_by,
            cache_path: self.cache.path(&key),
            cached_rows,
        })
    }
}

/// Fetch `[start, end]` straight from upstream without touching any cache.
pub fn fetch_bars(
    source: &dyn BarSource,
    clock: &dyn Clock,
    settings: &SyncSettings,
    request: &FetchRequest,
) -> Result<Vec<Bar>, DataError> {
    source.interval_token(request.period)?;
    let now = clock.now();
    let end = request.end.map_or(now, |end| end.min(now));
    if !source.is_available() {
        return Err(DataError::CircuitBreakerTripped);
    }

    let window = fetch_window(
        source,
        settings,
        &request.symbol,
        request.period,
        request.start,
        end,
        now,
    )?;
    if let Some(e) = &window.stopped_by {
        tracing::warn!(symbol = %request.symbol, error = %e, "fetch truncated");
    }

    Ok(window
        .bars
        .into_iter()
        .filter(|b| b.dt >= request.start && b.dt <= end)
        .collect())
}

/// Tradable symbols of a source.
pub fn list_symbols(source: &dyn BarSource) -> Result<Vec<SymbolInfo>, DataError> {
    let symbols = source.list_symbols()?;
    tracing::debug!(source = source.name(), count = symbols.len(), "symbols listed");
    Ok(symbols)
}
