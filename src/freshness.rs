//! Bar freshness policy
//!
//! Pure classification of whether a cached bar ought to be refetched.
//! Advisory only: staleness never deletes anything anywhere in the cache;
//! callers use it to decide when to go back to a provider.

use crate::models::{Bar, Timeframe};
use std::collections::HashMap;

/// TTL applied to timeframes without an explicit policy entry.
pub const DEFAULT_TTL_MS: i64 = 10 * 60 * 1000;

/// Bars whose own timestamp is older than this are historical: the market
/// has closed on them and they are treated as final, hence always fresh.
pub const HISTORICAL_CUTOFF_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Per-timeframe TTL table.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    ttls: HashMap<Timeframe, i64>,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        let mut ttls = HashMap::new();
        ttls.insert(Timeframe::M1, 5 * 60 * 1000);
        ttls.insert(Timeframe::M5, 15 * 60 * 1000);
        ttls.insert(Timeframe::H1, 2 * 60 * 60 * 1000);
        ttls.insert(Timeframe::D1, 24 * 60 * 60 * 1000);
        Self { ttls }
    }
}

impl FreshnessPolicy {
    /// Override the TTL for one timeframe.
    pub fn set_ttl(&mut self, timeframe: Timeframe, ttl_ms: i64) {
        self.ttls.insert(timeframe, ttl_ms);
    }

    /// TTL for a timeframe, falling back to [`DEFAULT_TTL_MS`].
    pub fn ttl_ms(&self, timeframe: Timeframe) -> i64 {
        self.ttls.get(&timeframe).copied().unwrap_or(DEFAULT_TTL_MS)
    }

    /// A bar is stale iff it is recent (its own timestamp is within the
    /// historical cutoff) and its observation has outlived the TTL.
    pub fn is_stale(&self, bar: &Bar, timeframe: Timeframe, now_ms: i64) -> bool {
        if now_ms - bar.timestamp > HISTORICAL_CUTOFF_MS {
            return false;
        }
        now_ms - bar.fetched_at > self.ttl_ms(timeframe)
    }

    /// The instant at which a bar's observation expires.
    pub fn stale_at(&self, bar: &Bar, timeframe: Timeframe) -> i64 {
        bar.fetched_at + self.ttl_ms(timeframe)
    }

    /// The stale subset of `bars`, in input order.
    pub fn stale_of<'a>(
        &self,
        bars: &'a [Bar],
        timeframe: Timeframe,
        now_ms: i64,
    ) -> Vec<&'a Bar> {
        bars.iter()
            .filter(|bar| self.is_stale(bar, timeframe, now_ms))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_MS: i64 = 60 * 1000;

    fn bar_at(timestamp: i64, fetched_at: i64) -> Bar {
        Bar {
            timestamp,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 100.0,
            provider: "polygon".to_string(),
            revision: 1,
            fetched_at,
        }
    }

    #[test]
    fn test_ttl_defaults_and_fallback() {
        let policy = FreshnessPolicy::default();
        assert_eq!(policy.ttl_ms(Timeframe::M1), 5 * MIN_MS);
        assert_eq!(policy.ttl_ms(Timeframe::M5), 15 * MIN_MS);
        assert_eq!(policy.ttl_ms(Timeframe::H1), 2 * 60 * MIN_MS);
        assert_eq!(policy.ttl_ms(Timeframe::D1), 24 * 60 * MIN_MS);
        // No entry for 15m: default applies.
        assert_eq!(policy.ttl_ms(Timeframe::M15), DEFAULT_TTL_MS);
    }

    #[test]
    fn test_recent_bar_stale_per_timeframe() {
        let policy = FreshnessPolicy::default();
        let now = 1_700_000_000_000;
        // Fetched ten minutes ago.
        let bar = bar_at(now - MIN_MS, now - 10 * MIN_MS);
        assert!(policy.is_stale(&bar, Timeframe::M1, now));
        assert!(!policy.is_stale(&bar, Timeframe::H1, now));
    }

    #[test]
    fn test_historical_bar_always_fresh() {
        let policy = FreshnessPolicy::default();
        let now = 1_700_000_000_000;
        let bar = bar_at(now - 30 * 24 * 60 * MIN_MS, 0);
        for tf in Timeframe::ALL {
            assert!(!policy.is_stale(&bar, tf, now));
        }
    }

    #[test]
    fn test_stale_at_and_filter() {
        let mut policy = FreshnessPolicy::default();
        policy.set_ttl(Timeframe::M5, 2 * MIN_MS);
        let now = 1_700_000_000_000;

        let fresh = bar_at(now - MIN_MS, now - MIN_MS);
        let stale = bar_at(now - MIN_MS, now - 5 * MIN_MS);
        assert_eq!(
            policy.stale_at(&stale, Timeframe::M5),
            stale.fetched_at + 2 * MIN_MS
        );

        let bars = vec![fresh, stale.clone()];
        let flagged = policy.stale_of(&bars, Timeframe::M5, now);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0], &stale);
    }
}
