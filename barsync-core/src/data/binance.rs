//! Binance spot REST source.
//!
//! Klines come from `GET /api/v3/klines`, one page of at most 1000 rows per
//! call, stamped with their open time in UTC epoch milliseconds. Bans (418,
//! 403) trip the shared circuit breaker immediately; 429 counts as a failure.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{
    BarSource, DataError, PageRequest, RawPage, SourceClock, SourceProfile, StampConvention,
};
use crate::domain::{Period, SymbolInfo};
use crate::settings::SourceSettings;
use polars::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Hard cap of the klines endpoint.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Error body Binance returns with 4xx responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

pub struct BinanceSource {
    client: reqwest::blocking::Client,
    base_url: String,
    page_limit: usize,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceSource {
    pub fn new(
        settings: &SourceSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &settings.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| DataError::DependencyMissing(format!("invalid API key header: {e}")))?;
            headers.insert("x-mbx-apikey", value);
        }

        let mut builder = reqwest::blocking::Client::builder()
            .timeout(settings.timeout())
            .default_headers(headers);
        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| DataError::DependencyMissing(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| DataError::DependencyMissing(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            page_limit: settings
                .page_limit
                .unwrap_or(MAX_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
            circuit_breaker,
        })
    }

    /// Send a GET and map transport and status failures onto `DataError`.
    fn get(&self, path: &str, query: &[(&str, String)], symbol: &str) -> Result<Value, DataError> {
        self.circuit_breaker.check()?;

        let url = format!("{}{path}", self.base_url);
        let resp = self.client.get(&url).query(query).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            DataError::NetworkUnreachable(e.to_string())
        })?;

        let status = resp.status();
        if status == StatusCode::IM_A_TEAPOT || status == StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status.is_server_error() {
            self.circuit_breaker.record_failure();
            return Err(DataError::NetworkUnreachable(format!("HTTP {status} from {path}")));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(classify_client_error(status, &body, symbol));
        }

        let value: Value = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse {path} response: {e}"))
        })?;
        self.circuit_breaker.record_success();
        Ok(value)
    }
}

fn classify_client_error(status: StatusCode, body: &str, symbol: &str) -> DataError {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) if err.code == -1121 => DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Ok(err) => DataError::Api(format!("HTTP {status}: {} ({})", err.msg, err.code)),
        Err(_) => DataError::Api(format!("HTTP {status}: {body}")),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Convert a klines array into a page.
///
/// Each row is `[open_time, open, high, low, close, volume, close_time,
/// quote_volume, ...]` with prices as decimal strings. The quote volume is
/// not carried; `amount` is synthesized as `vol * close` downstream.
pub fn klines_to_frame(rows: &[Value]) -> Result<RawPage, DataError> {
    let n = rows.len();
    let mut open_time = Vec::with_capacity(n);
    let mut close_time = Vec::with_capacity(n);
    let mut cols: [Vec<Option<f64>>; 5] = Default::default();

    for (i, row) in rows.iter().enumerate() {
        let fields = row
            .as_array()
            .filter(|f| f.len() >= 8)
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("kline row {i} malformed")))?;
        open_time.push(as_i64(&fields[0]));
        close_time.push(as_i64(&fields[6]));
        for (col, idx) in cols.iter_mut().zip(1..=5) {
            col.push(as_f64(&fields[idx]));
        }
    }

    let last_stamp_ms = open_time.iter().flatten().max().copied();
    let [open, high, low, close, volume] = cols;
    let frame = DataFrame::new(vec![
        Column::new("open_time".into(), open_time),
        Column::new("open".into(), open),
        Column::new("high".into(), high),
        Column::new("low".into(), low),
        Column::new("close".into(), close),
        Column::new("volume".into(), volume),
        Column::new("close_time".into(), close_time),
    ])
    .map_err(|e| DataError::ResponseFormatChanged(format!("kline frame: {e}")))?;

    Ok(RawPage::new(frame, last_stamp_ms))
}

impl BarSource for BinanceSource {
    fn name(&self) -> &str {
        "binance"
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            stamps: StampConvention::OpenTime,
            clock: SourceClock::Utc,
            page_limit: self.page_limit,
        }
    }

    fn interval_token(&self, period: Period) -> Result<&'static str, DataError> {
        // Binance tokens match the period vocabulary one to one.
        Ok(period.as_str())
    }

    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<RawPage, DataError> {
        let query = [
            ("symbol", request.symbol.to_string()),
            ("interval", request.interval.to_string()),
            ("startTime", request.since_ms.to_string()),
            ("endTime", request.until_ms.to_string()),
            ("limit", request.limit.min(MAX_PAGE_LIMIT).to_string()),
        ];
        let body = self.get("/api/v3/klines", &query, request.symbol)?;
        let rows = body
            .as_array()
            .ok_or_else(|| DataError::ResponseFormatChanged("klines is not an array".into()))?;
        klines_to_frame(rows)
    }

    fn list_symbols(&self) -> Result<Vec<SymbolInfo>, DataError> {
        let body = self.get("/api/v3/exchangeInfo", &[], "")?;
        let info: ExchangeInfo = serde_json::from_value(body)
            .map_err(|e| DataError::ResponseFormatChanged(format!("exchangeInfo: {e}")))?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| SymbolInfo {
                symbol: s.symbol,
                base: Some(s.base_asset),
                quote: Some(s.quote_asset),
                name: None,
            })
            .collect())
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
