//! barsync core: incremental OHLCV bar sync with a local Parquet cache.
//!
//! - Domain types (bars, periods, symbols)
//! - Upstream sources behind the `BarSource` trait (Binance spot, A-share)
//! - Normalizer mapping heterogeneous upstream tables onto one bar schema
//! - Cursor paginator with a politeness delay
//! - Parquet cache with idempotent merge and metadata sidecars
//! - Sync orchestrator tying them together

pub mod clock;
pub mod data;
pub mod domain;
pub mod settings;
pub mod sync;

pub use clock::{Clock, FixedClock, SystemClock};
pub use data::{BarCache, BarSource, DataError};
pub use domain::{Bar, Period, SymbolInfo};
pub use settings::{SourceSettings, SyncSettings};
pub use sync::{fetch_bars, list_symbols, FetchRequest, SyncEngine, SyncReport};
