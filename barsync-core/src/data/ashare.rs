//! Chinese A-share source over public quote endpoints.
//!
//! No single endpoint is reliable, so every page request walks an ordered
//! list of equivalent calls (Sina minute klines, Eastmoney recent klines,
//! Eastmoney ranged history) and keeps the first that answers. Each call
//! returns rows under its provider's own column names; the normalizer's
//! alias table maps them. Timestamps are already close times at UTC+8.

use super::circuit_breaker::CircuitBreaker;
use super::normalize::parse_stamp;
use super::probe::first_success;
use super::provider::{
    BarSource, DataError, PageRequest, RawPage, SourceClock, SourceProfile, StampConvention,
};
use crate::clock::{epoch_ms_to_reference, reference_to_epoch_ms};
use crate::domain::{Period, SymbolInfo};
use crate::settings::SourceSettings;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

const SINA_KLINE_URL: &str = "https://money.finance.sina.com.cn/quotes_service/api/json_v2.php/CN_MarketData.getKLineData";
const EASTMONEY_KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const EASTMONEY_LIST_URL: &str = "https://82.push2.eastmoney.com/api/qt/clist/get";

/// Most rows the Sina endpoint returns in one call.
pub const MAX_PAGE_LIMIT: usize = 1970;

const SINA_COLUMNS: &[&str] = &["day", "open", "high", "low", "close", "volume"];
const EASTMONEY_COLUMNS: &[&str] = &["时间", "开盘", "收盘", "最高", "最低", "成交量", "成交额"];

/// One text row under a call's native column names.
pub type NativeRow = Vec<Option<String>>;

/// Equivalent upstream calls, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AShareCall {
    SinaMinute,
    EastmoneyMinute,
    EastmoneyHistory,
}

impl AShareCall {
    pub const ALL: [AShareCall; 3] = [
        AShareCall::SinaMinute,
        AShareCall::EastmoneyMinute,
        AShareCall::EastmoneyHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AShareCall::SinaMinute => "sina_minute",
            AShareCall::EastmoneyMinute => "eastmoney_minute",
            AShareCall::EastmoneyHistory => "eastmoney_history",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            AShareCall::SinaMinute => SINA_COLUMNS,
            AShareCall::EastmoneyMinute | AShareCall::EastmoneyHistory => EASTMONEY_COLUMNS,
        }
    }
}

impl fmt::Display for AShareCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange an A-share code trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Market {
    fn prefix(&self) -> &'static str {
        match self {
            Market::Shanghai => "sh",
            Market::Shenzhen => "sz",
            Market::Beijing => "bj",
        }
    }

    /// Eastmoney market id used in `secid`.
    fn eastmoney_id(&self) -> u8 {
        match self {
            Market::Shanghai => 1,
            Market::Shenzhen | Market::Beijing => 0,
        }
    }
}

/// Split `600519`, `sh600519` or `600519.SH` into market and bare code.
pub fn split_symbol(symbol: &str) -> Result<(Market, String), DataError> {
    let lower = symbol.trim().to_ascii_lowercase();
    let (explicit, code) = if let Some((code, suffix)) = lower.split_once('.') {
        (Some(suffix.to_string()), code.to_string())
    } else if lower.len() > 6 && lower.is_char_boundary(2) {
        let (prefix, code) = lower.split_at(2);
        (Some(prefix.to_string()), code.to_string())
    } else {
        (None, lower)
    };

    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        });
    }

    let market = match explicit.as_deref() {
        Some("sh") => Market::Shanghai,
        Some("sz") => Market::Shenzhen,
        Some("bj") => Market::Beijing,
        Some(_) => {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
        }
        None => match code.as_bytes()[0] {
            b'5' | b'6' | b'9' => Market::Shanghai,
            b'4' | b'8' => Market::Beijing,
            _ => Market::Shenzhen,
        },
    };
    Ok((market, code))
}

pub struct AShareSource {
    client: reqwest::blocking::Client,
    page_limit: usize,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AShareSource {
    pub fn new(
        settings: &SourceSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        if settings.base_url.is_some() {
            tracing::warn!("base_url is ignored by the A-share source");
        }

        let mut builder = reqwest::blocking::Client::builder()
            .timeout(settings.timeout())
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36");
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
            page_limit: settings
                .page_limit
                .unwrap_or(MAX_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
            circuit_breaker,
        })
    }

    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, DataError> {
        self.circuit_breaker.check()?;

        let resp = self.client.get(url).query(query).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            DataError::NetworkUnreachable(e.to_string())
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            return Err(DataError::RateLimited {
                retry_after_secs: 60,
            });
        }
        if status.is_server_error() {
            self.circuit_breaker.record_failure();
            return Err(DataError::NetworkUnreachable(format!("HTTP {status} from {url}")));
        }
        if !status.is_success() {
            return Err(DataError::Api(format!("HTTP {status} from {url}")));
        }

        let body = resp
            .text()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
        self.circuit_breaker.record_success();
        serde_json::from_str(&body)
            .map_err(|e| DataError::ResponseFormatChanged(format!("{url}: {e}")))
    }

    fn run(&self, call: AShareCall, request: &PageRequest<'_>) -> Result<Vec<NativeRow>, DataError> {
        let (market, code) = split_symbol(request.symbol)?;
        let limit = request.limit.min(self.page_limit).to_string();

        match call {
            AShareCall::SinaMinute => {
                let scale = sina_scale(request.interval)
                    .ok_or_else(|| unsupported_token(request.interval, call))?;
                let query = [
                    ("symbol", format!("{}{code}", market.prefix())),
                    ("scale", scale.to_string()),
                    ("ma", "no".to_string()),
                    ("datalen", limit),
                ];
                parse_sina(&self.get_json(SINA_KLINE_URL, &query)?)
            }
            AShareCall::EastmoneyMinute | AShareCall::EastmoneyHistory => {
                let klt = eastmoney_klt(request.interval)
                    .ok_or_else(|| unsupported_token(request.interval, call))?;
                let mut query = vec![
                    ("secid", format!("{}.{code}", market.eastmoney_id())),
                    ("klt", klt.to_string()),
                    ("fqt", "0".to_string()),
                    ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
                    ("fields2", "f51,f52,f53,f54,f55,f56,f57".to_string()),
                ];
                if call == AShareCall::EastmoneyMinute {
                    query.push(("end", "20500101".to_string()));
                    query.push(("lmt", limit));
                } else {
                    let day = |ms: i64| {
                        epoch_ms_to_reference(ms)
                            .map(|dt| dt.format("%Y%m%d").to_string())
                            .unwrap_or_else(|| "0".to_string())
                    };
                    query.push(("beg", day(request.since_ms)));
                    query.push(("end", day(request.until_ms)));
                }
                parse_eastmoney(&self.get_json(EASTMONEY_KLINE_URL, &query)?)
            }
        }
    }
}

fn unsupported_token(interval: &str, call: AShareCall) -> DataError {
    DataError::UpstreamCallFailed {
        call: call.to_string(),
        reason: format!("interval '{interval}' not served"),
    }
}

fn sina_scale(interval: &str) -> Option<&'static str> {
    match interval {
        "5" => Some("5"),
        "15" => Some("15"),
        "30" => Some("30"),
        "60" => Some("60"),
        "daily" => Some("240"),
        _ => None,
    }
}

fn eastmoney_klt(interval: &str) -> Option<&'static str> {
    match interval {
        "1" => Some("1"),
        "5" => Some("5"),
        "15" => Some("15"),
        "30" => Some("30"),
        "60" => Some("60"),
        "daily" => Some("101"),
        _ => None,
    }
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Sina answers a JSON array of objects keyed by the native column names.
pub fn parse_sina(body: &Value) -> Result<Vec<NativeRow>, DataError> {
    let items = match body {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(DataError::ResponseFormatChanged("sina: expected array".into())),
    };
    items
        .iter()
        .map(|item| {
            let obj = item
                .as_object()
                .ok_or_else(|| DataError::ResponseFormatChanged("sina: row is not an object".into()))?;
            Ok(SINA_COLUMNS
                .iter()
                .map(|c| obj.get(*c).and_then(text))
                .collect())
        })
        .collect()
}

/// Eastmoney packs each kline as one comma-separated string under `data.klines`.
pub fn parse_eastmoney(body: &Value) -> Result<Vec<NativeRow>, DataError> {
    let data = match body.get("data") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(data) => data,
    };
    let klines = data
        .get("klines")
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::ResponseFormatChanged("eastmoney: missing klines".into()))?;

    Ok(klines
        .iter()
        .filter_map(Value::as_str)
        .map(|line| {
            let mut fields: NativeRow = line
                .split(',')
                .take(EASTMONEY_COLUMNS.len())
                .map(|f| Some(f.to_string()))
                .collect();
            fields.resize(EASTMONEY_COLUMNS.len(), None);
            fields
        })
        .collect())
}

/// Keep rows stamped inside `[since, until]`; undatable rows are dropped.
fn within(rows: Vec<NativeRow>, since: NaiveDateTime, until: NaiveDateTime) -> Vec<NativeRow> {
    rows.into_iter()
        .filter(|row| {
            row.first()
                .and_then(|v| v.as_deref())
                .and_then(parse_stamp)
                .is_some_and(|dt| dt >= since && dt <= until)
        })
        .collect()
}

/// Rows as a string table under the call's native column names.
pub fn rows_to_page(call: AShareCall, rows: &[NativeRow]) -> Result<RawPage, DataError> {
    let columns = call
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values: Vec<Option<&str>> = rows
                .iter()
                .map(|row| row.get(i).and_then(|v| v.as_deref()))
                .collect();
            Column::new((*name).into(), values)
        })
        .collect();
    let frame = DataFrame::new(columns)
        .map_err(|e| DataError::ResponseFormatChanged(format!("{call} frame: {e}")))?;

    let last_stamp_ms = rows
        .iter()
        .filter_map(|row| row.first().and_then(|v| v.as_deref()).and_then(parse_stamp))
        .max()
        .map(reference_to_epoch_ms);
    Ok(RawPage::new(frame, last_stamp_ms))
}

impl BarSource for AShareSource {
    fn name(&self) -> &str {
        "ashare"
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            stamps: StampConvention::CloseTime,
            clock: SourceClock::Reference,
            page_limit: self.page_limit,
        }
    }

    fn interval_token(&self, period: Period) -> Result<&'static str, DataError> {
        match period {
            Period::M1 => Ok("1"),
            Period::M5 => Ok("5"),
            Period::M15 => Ok("15"),
            Period::M30 => Ok("30"),
            Period::H1 => Ok("60"),
            Period::D1 => Ok("daily"),
            Period::H2 | Period::H4 => Err(DataError::unsupported(period, self.name())),
        }
    }

    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<RawPage, DataError> {
        let since = epoch_ms_to_reference(request.since_ms).unwrap_or(NaiveDateTime::MIN);
        let until = epoch_ms_to_reference(request.until_ms).unwrap_or(NaiveDateTime::MAX);

        let (call, rows) = first_success(request.symbol, &AShareCall::ALL, |call| {
            self.run(call, request).map(|rows| within(rows, since, until))
        })?;
        tracing::debug!(symbol = request.symbol, call = %call, rows = rows.len(), "a-share page");

        rows_to_page(call, &rows)
    }

    fn list_symbols(&self) -> Result<Vec<SymbolInfo>, DataError> {
        let query = [
            ("pn", "1".to_string()),
            ("pz", "10000".to_string()),
            ("po", "1".to_string()),
            ("np", "1".to_string()),
            ("fltt", "2".to_string()),
            ("invt", "2".to_string()),
            ("fid", "f12".to_string()),
            (
                "fs",
                "m:0 t:6,m:0 t:80,m:1 t:2,m:1 t:23,m:0 t:81 s:2048".to_string(),
            ),
            ("fields", "f12,f14".to_string()),
        ];
        parse_symbol_list(&self.get_json(EASTMONEY_LIST_URL, &query)?)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// `data.diff` is an array of `{f12: code, f14: name}`.
pub fn parse_symbol_list(body: &Value) -> Result<Vec<SymbolInfo>, DataError> {
    let diff = body
        .get("data")
        .and_then(|d| d.get("diff"))
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::ResponseFormatChanged("eastmoney: missing data.diff".into()))?;

    Ok(diff
        .iter()
        .filter_map(|item| {
            let code = item.get("f12").and_then(text)?;
            let mut info = SymbolInfo::new(code);
            info.name = item.get("f14").and_then(text);
            Some(info)
        })
        .collect())
}
