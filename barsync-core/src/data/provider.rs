//! Upstream source trait and structured error types.
//!
//! The BarSource trait abstracts over market data vendors (Binance, A-share
//! web endpoints) so the paginator and sync engine never see transport
//! details, and so tests can script pages in memory.

use crate::domain::{Period, SymbolInfo};
use polars::prelude::DataFrame;
use thiserror::Error;

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output as-is.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    #[error("period '{period}' is not supported by {provider}")]
    UnsupportedPeriod { period: String, provider: String },

    #[error("upstream call {call} failed: {reason}")]
    UpstreamCallFailed { call: String, reason: String },

    #[error("no upstream call succeeded for '{symbol}' (tried: {})", .tried.join(", "))]
    UpstreamUnavailable { symbol: String, tried: Vec<String> },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("API error: {0}")]
    Api(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("normalize error: {0}")]
    Normalize(String),

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),
}

impl DataError {
    /// Transport-level failures. Pagination stops on these and keeps what it
    /// already has instead of failing the sync.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::RateLimited { .. }
                | DataError::CircuitBreakerTripped
        )
    }

    pub fn unsupported(period: Period, provider: &str) -> Self {
        DataError::UnsupportedPeriod {
            period: period.as_str().to_string(),
            provider: provider.to_string(),
        }
    }
}

/// Which edge of the interval an upstream timestamp names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampConvention {
    OpenTime,
    CloseTime,
}

/// Clock the upstream timestamps are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClock {
    /// Epoch values or UTC wall-clock strings; shifted +8h on normalize.
    Utc,
    /// Already in the reference timezone.
    Reference,
}

/// Static description of how a source reports its bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProfile {
    pub stamps: StampConvention,
    pub clock: SourceClock,
    /// Row cap of a single upstream call.
    pub page_limit: usize,
}

/// One bounded upstream call over `[since_ms, until_ms]`.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub symbol: &'a str,
    pub interval: &'a str,
    pub since_ms: i64,
    pub until_ms: i64,
    pub limit: usize,
}

/// Raw upstream rows with source-native column names.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub frame: DataFrame,
    /// Largest timestamp in the page, epoch milliseconds. Drives the cursor.
    pub last_stamp_ms: Option<i64>,
}

impl RawPage {
    pub fn new(frame: DataFrame, last_stamp_ms: Option<i64>) -> Self {
        Self {
            frame,
            last_stamp_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Trait for upstream bar sources.
///
/// Implementations handle the specifics of one vendor. The cache layer sits
/// above this trait; sources don't know about the cache.
pub trait BarSource: Send + Sync {
    /// Short name, also the cache subdirectory.
    fn name(&self) -> &str;

    fn profile(&self) -> SourceProfile;

    /// Source-specific interval token for a period, or `UnsupportedPeriod`.
    fn interval_token(&self, period: Period) -> Result<&'static str, DataError>;

    /// Fetch one bounded page of raw rows.
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<RawPage, DataError>;

    /// List tradable symbols.
    fn list_symbols(&self) -> Result<Vec<SymbolInfo>, DataError>;

    /// Check if the source is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}
