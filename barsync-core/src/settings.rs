//! Runtime settings passed into the library as values.
//!
//! Nothing here reads files or the environment; the CLI does that and
//! hands the result over.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync-wide knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Sleep between consecutive upstream pages.
    pub page_delay_ms: u64,
    /// How far past "now" the upstream window extends.
    pub forward_skew_secs: i64,
    /// Cap on pages per sync; `None` is unbounded.
    pub max_pages: Option<usize>,
    /// Start used when the caller does not give one.
    pub default_start: NaiveDate,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_delay_ms: 200,
            forward_skew_secs: 60,
            max_pages: None,
            default_start: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap_or_default(),
        }
    }
}

impl SyncSettings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn forward_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.forward_skew_secs)
    }

    pub fn default_start_dt(&self) -> NaiveDateTime {
        self.default_start.and_time(chrono::NaiveTime::MIN)
    }
}

/// Connection settings for one upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Overrides the source's public endpoint (used for mirrors and tests).
    pub base_url: Option<String>,
    /// HTTP(S) proxy for every request, e.g. `http://127.0.0.1:7890`.
    pub proxy: Option<String>,
    pub timeout_secs: u64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Rows per upstream call; clamped to the source maximum.
    pub page_limit: Option<usize>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            proxy: None,
            timeout_secs: 30,
            api_key: None,
            page_limit: None,
        }
    }
}

impl SourceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
