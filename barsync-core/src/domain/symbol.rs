use serde::{Deserialize, Serialize};

/// A tradable instrument as listed by an upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SymbolInfo {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            base: None,
            quote: None,
            name: None,
        }
    }
}

/// Make a symbol safe to embed in a file name.
///
/// ASCII alphanumerics, `-`, `_` and `.` pass through; every other byte is
/// escaped as `%XX`, so distinct symbols never share a file
/// (`BTC/USDT` → `BTC%2FUSDT`, while `BTC-USDT` stays as is).
pub fn file_safe_symbol(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for byte in symbol.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
