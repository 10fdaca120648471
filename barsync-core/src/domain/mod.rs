//! Domain types for barsync

pub mod bar;
pub mod period;
pub mod symbol;

pub use bar::{dedup_keep_last, high_water_mark, Bar, RawBar};
pub use period::{ParsePeriodError, Period};
pub use symbol::{file_safe_symbol, SymbolInfo};
