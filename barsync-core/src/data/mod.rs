//! Upstream sources, normalization, pagination and the Parquet cache

pub mod ashare;
pub mod binance;
pub mod cache;
pub mod circuit_breaker;
pub mod normalize;
pub mod paginate;
pub mod probe;
pub mod provider;
pub mod schema;

pub use ashare::{AShareCall, AShareSource};
pub use binance::BinanceSource;
pub use cache::{merge_series, resume_point, BarCache, CacheKey, CacheMeta, CacheStatus};
pub use circuit_breaker::CircuitBreaker;
pub use normalize::{normalize, synthesize_amount, NormalizeOptions};
pub use paginate::{PagedFetch, Paginator};
pub use probe::first_success;
pub use provider::{
    BarSource, DataError, PageRequest, RawPage, SourceClock, SourceProfile, StampConvention,
};
pub use schema::{BarSchema, SchemaError};
