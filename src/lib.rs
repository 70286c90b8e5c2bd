//! Market-Data Bar Cache
//!
//! Two-tier, revision-aware, provider-priority-merging cache for OHLCV
//! bars: a bounded in-memory LRU in front of a durable SQLite store, with
//! correction events fanned out synchronously to in-process subscribers.
//!
//! All writes flow through [`BarCache::upsert_bars`], which merges each
//! observation under the provider-trust and revision rules and reports
//! winner changes as [`CorrectionEvent`]s. Range reads are served from the
//! memory tier while it still covers the interval and are otherwise read
//! through the durable tier.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod freshness;
pub mod models;

// Re-export the public surface at the crate root for convenience.
pub use cache::{BarCache, BarLruCache, BarStore, CacheStats, MillisClock, UpsertOutcome};
pub use config::{CacheConfig, ProviderPriority};
pub use error::{CacheError, CacheResult};
pub use events::{CorrectionBus, CorrectionHandler, ErrorSink, Subscription};
pub use freshness::{FreshnessPolicy, DEFAULT_TTL_MS, HISTORICAL_CUTOFF_MS};
pub use models::{Bar, BarKey, BarsQuery, CorrectionEvent, CorrectionKind, Timeframe};
