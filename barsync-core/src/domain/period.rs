//! Bar interval vocabulary.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed set of bar intervals the sync engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Period {
    pub const ALL: [Period; 8] = [
        Period::M1,
        Period::M5,
        Period::M15,
        Period::M30,
        Period::H1,
        Period::H2,
        Period::H4,
        Period::D1,
    ];

    /// Canonical token, also used in cache file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::M1 => "1m",
            Period::M5 => "5m",
            Period::M15 => "15m",
            Period::M30 => "30m",
            Period::H1 => "1h",
            Period::H2 => "2h",
            Period::H4 => "4h",
            Period::D1 => "1d",
        }
    }

    /// Wall-clock length of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Period::M1 => Duration::minutes(1),
            Period::M5 => Duration::minutes(5),
            Period::M15 => Duration::minutes(15),
            Period::M30 => Duration::minutes(30),
            Period::H1 => Duration::hours(1),
            Period::H2 => Duration::hours(2),
            Period::H4 => Duration::hours(4),
            Period::D1 => Duration::days(1),
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Period::D1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown period '{0}' (expected one of 1m, 5m, 15m, 30m, 1h, 2h, 4h, 1d)")]
pub struct ParsePeriodError(pub String);

impl FromStr for Period {
    type Err = ParsePeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Ok(Period::M1),
            "5m" | "5min" => Ok(Period::M5),
            "15m" | "15min" => Ok(Period::M15),
            "30m" | "30min" => Ok(Period::M30),
            "1h" | "60m" => Ok(Period::H1),
            "2h" | "120m" => Ok(Period::H2),
            "4h" | "240m" => Ok(Period::H4),
            "1d" | "d" | "day" => Ok(Period::D1),
            _ => Err(ParsePeriodError(s.to_string())),
        }
    }
}
