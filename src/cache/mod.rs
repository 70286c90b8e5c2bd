//! Two-tier bar cache: bounded LRU memory tier over a durable SQLite tier,
//! coordinated by the service façade.

pub mod memory;
pub mod service;
pub mod store;

pub use memory::BarLruCache;
pub use service::{BarCache, CacheStats, MillisClock};
pub use store::{BarStore, UpsertOutcome};
