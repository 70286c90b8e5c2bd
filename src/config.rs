//! Cache configuration
//!
//! Policy inputs injected at construction: provider trust order, freshness
//! TTL overrides, and the memory tier bound. Loaded from TOML or built in
//! code; validated before the service is assembled.

use crate::error::{CacheError, CacheResult};
use crate::freshness::FreshnessPolicy;
use crate::models::Timeframe;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Bar cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Provider trust order, highest trust first.
    #[serde(default = "default_provider_priority")]
    pub provider_priority: Vec<String>,

    /// Per-timeframe freshness TTL overrides in milliseconds, keyed by the
    /// canonical timeframe string ("1m", "5m", "1h", "1D", ...).
    #[serde(default)]
    pub freshness_ttl_ms: HashMap<String, i64>,

    /// Memory tier LRU bound (number of winning bars held hot).
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

fn default_provider_priority() -> Vec<String> {
    vec!["polygon".to_string(), "yahoo".to_string()]
}

fn default_memory_capacity() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider_priority: default_provider_priority(),
            freshness_ttl_ms: HashMap::new(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl CacheConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> CacheResult<Self> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            CacheError::Config(format!("read {} failed: {e}", path.as_ref().display()))
        })?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| CacheError::Config(format!("parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.provider_priority.is_empty() {
            return Err(CacheError::Config(
                "provider priority must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for provider in &self.provider_priority {
            if provider.is_empty() {
                return Err(CacheError::Config("empty provider name in priority".into()));
            }
            if !seen.insert(provider.as_str()) {
                return Err(CacheError::Config(format!(
                    "duplicate provider in priority: {provider}"
                )));
            }
        }
        for (key, ttl) in &self.freshness_ttl_ms {
            key.parse::<Timeframe>()?;
            if *ttl <= 0 {
                return Err(CacheError::Config(format!(
                    "non-positive ttl for {key}: {ttl}"
                )));
            }
        }
        Ok(())
    }

    /// Build the freshness policy: defaults overlaid with the configured
    /// overrides. Assumes `validate` passed.
    pub fn freshness_policy(&self) -> CacheResult<FreshnessPolicy> {
        let mut policy = FreshnessPolicy::default();
        for (key, ttl) in &self.freshness_ttl_ms {
            policy.set_ttl(key.parse::<Timeframe>()?, *ttl);
        }
        Ok(policy)
    }
}

/// Provider trust ranking derived from the configured priority list.
///
/// Lower rank wins. Providers absent from the list rank below every listed
/// one; ties among unlisted providers break by lexicographic name.
#[derive(Debug, Clone)]
pub struct ProviderPriority {
    rank: HashMap<String, usize>,
}

impl ProviderPriority {
    pub fn new(order: &[String]) -> Self {
        let mut rank = HashMap::with_capacity(order.len());
        for (i, provider) in order.iter().enumerate() {
            // First occurrence wins; duplicates are a config validation error.
            rank.entry(provider.clone()).or_insert(i);
        }
        Self { rank }
    }

    pub fn rank(&self, provider: &str) -> usize {
        self.rank.get(provider).copied().unwrap_or(usize::MAX)
    }

    /// Total order over providers: trust rank, then name.
    pub fn cmp_providers(&self, a: &str, b: &str) -> Ordering {
        self.rank(a).cmp(&self.rank(b)).then_with(|| a.cmp(b))
    }
}
