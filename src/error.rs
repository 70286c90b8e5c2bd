//! Cache error taxonomy
//!
//! Validation errors surface synchronously at the service boundary; storage
//! errors propagate from the durable tier. The memory tier and the event
//! bus never originate errors visible to callers.

use thiserror::Error;

/// Errors surfaced by the bar cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid bar: {0}")]
    InvalidBar(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
