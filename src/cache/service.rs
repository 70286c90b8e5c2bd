//! Cache service façade
//!
//! Coordinates the two tiers: write-through merge upserts with correction
//! detection and event fan-out, read-through range queries with coverage
//! probing, warmup, and freshness classification for callers deciding when
//! to refetch.

use crate::cache::memory::BarLruCache;
use crate::cache::store::BarStore;
use crate::config::{CacheConfig, ProviderPriority};
use crate::error::{CacheError, CacheResult};
use crate::events::{CorrectionBus, ErrorSink, Subscription};
use crate::freshness::FreshnessPolicy;
use crate::models::{Bar, BarKey, BarsQuery, CorrectionEvent, CorrectionKind, Timeframe};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Injectable millisecond clock; tests pin it, production reads UTC time.
pub type MillisClock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    mem_range_hits: AtomicU64,
    store_range_reads: AtomicU64,
    bars_upserted: AtomicU64,
    corrections_published: AtomicU64,
}

/// Point-in-time service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mem_cache_size: usize,
    pub mem_capacity: usize,
    pub subscriber_count: usize,
    pub mem_range_hits: u64,
    pub store_range_reads: u64,
    pub bars_upserted: u64,
    pub corrections_published: u64,
}

/// Two-tier bar cache service.
pub struct BarCache {
    store: BarStore,
    memory: Mutex<BarLruCache>,
    bus: CorrectionBus,
    freshness: FreshnessPolicy,
    clock: MillisClock,
    counters: Counters,
    /// Bumped on every write-through. Read-through promotion is abandoned
    /// when a writer overtook the durable scan, so a stale scan can never
    /// overwrite a fresher winner nor claim coverage for it.
    write_epoch: AtomicU64,
}

impl BarCache {
    /// Open a file-backed cache.
    pub fn open(db_path: &str, config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let store = BarStore::open(db_path, ProviderPriority::new(&config.provider_priority))?;
        Self::assemble(store, config)
    }

    /// Open a cache over an in-memory durable tier.
    pub fn open_memory(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let store = BarStore::open_memory(ProviderPriority::new(&config.provider_priority))?;
        Self::assemble(store, config)
    }

    fn assemble(store: BarStore, config: &CacheConfig) -> CacheResult<Self> {
        Ok(Self {
            store,
            memory: Mutex::new(BarLruCache::new(config.memory_capacity)),
            bus: CorrectionBus::new(),
            freshness: config.freshness_policy()?,
            clock: Arc::new(|| Utc::now().timestamp_millis()),
            counters: Counters::default(),
            write_epoch: AtomicU64::new(0),
        })
    }

    /// Replace the clock used to stamp `detected_at` on events.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Merge a batch of observations for one (symbol, timeframe) series.
    ///
    /// Per bar, in input order: apply the store's transactional merge, then
    /// classify the winner transition. A first-ever winner is silent; a
    /// same-provider supersession emits `Revision`; a cross-provider
    /// takeover emits `ProviderOverride`.
    ///
    /// The memory tier is updated and events fan out only after every
    /// durable write has committed, so a storage failure mid-batch leaves
    /// both untouched.
    pub fn upsert_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> CacheResult<Vec<CorrectionEvent>> {
        if symbol.is_empty() {
            return Err(CacheError::InvalidInput("empty symbol".into()));
        }
        for bar in bars {
            bar.validate()?;
        }
        if bars.is_empty() {
            return Ok(Vec::new());
        }

        let detected_at = (self.clock)();
        let mut changed: Vec<(BarKey, Bar)> = Vec::new();
        let mut events: Vec<CorrectionEvent> = Vec::new();

        for bar in bars {
            let key = BarKey::new(symbol, timeframe, bar.timestamp);
            let outcome = match self.store.upsert(&key, bar) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Earlier bars in the batch are already durable. Their
                    // entries and events stay untouched, but any coverage
                    // claim over them is no longer trustworthy.
                    let mut mem = self.memory.lock();
                    for (committed, _) in &changed {
                        mem.puncture_coverage(
                            &committed.symbol,
                            committed.timeframe,
                            committed.timestamp,
                        );
                    }
                    return Err(e);
                }
            };
            let Some(new_winner) = outcome.new_winner else {
                continue;
            };
            if outcome.old_winner.as_ref() == Some(&new_winner) {
                continue;
            }
            if let Some(old) = &outcome.old_winner {
                let kind = if old.provider == new_winner.provider {
                    CorrectionKind::Revision
                } else {
                    CorrectionKind::ProviderOverride
                };
                events.push(CorrectionEvent {
                    symbol: symbol.to_string(),
                    timeframe,
                    timestamp: bar.timestamp,
                    old_bar: Some(old.clone()),
                    new_bar: new_winner.clone(),
                    kind,
                    detected_at,
                });
            }
            changed.push((key, new_winner));
        }
        self.counters
            .bars_upserted
            .fetch_add(bars.len() as u64, Ordering::Relaxed);

        // Every durable write committed; now write through and fan out.
        if !changed.is_empty() {
            let mut mem = self.memory.lock();
            self.write_epoch.fetch_add(1, Ordering::Release);
            for (key, winner) in &changed {
                mem.put(key.clone(), winner.clone());
            }
        }
        for event in &events {
            self.bus.publish(event);
        }
        self.counters
            .corrections_published
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        Ok(events)
    }

    /// Winning bars for a half-open range, served from the memory tier when
    /// it still covers the interval, otherwise read through the durable
    /// tier and promoted.
    pub fn get_bars(&self, query: &BarsQuery) -> CacheResult<Vec<Bar>> {
        if query.symbol.is_empty() {
            return Err(CacheError::InvalidInput("empty symbol".into()));
        }
        if query.start_ms > query.end_ms {
            return Err(CacheError::InvalidQuery(format!(
                "start {} after end {}",
                query.start_ms, query.end_ms
            )));
        }
        if query.start_ms == query.end_ms {
            return Ok(Vec::new());
        }

        {
            let mut mem = self.memory.lock();
            if mem.covers(&query.symbol, query.timeframe, query.start_ms, query.end_ms) {
                self.counters.mem_range_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(mem.get_range(
                    &query.symbol,
                    query.timeframe,
                    query.start_ms,
                    query.end_ms,
                ));
            }
        }

        let epoch = self.write_epoch.load(Ordering::Acquire);
        let winners = self.store.winners_in_range(
            &query.symbol,
            query.timeframe,
            query.start_ms,
            query.end_ms,
        )?;
        self.counters
            .store_range_reads
            .fetch_add(1, Ordering::Relaxed);

        let mut mem = self.memory.lock();
        if self.write_epoch.load(Ordering::Acquire) == epoch {
            mem.note_range(&query.symbol, query.timeframe, query.start_ms, query.end_ms);
            for bar in &winners {
                mem.put(
                    BarKey::new(&query.symbol, query.timeframe, bar.timestamp),
                    bar.clone(),
                );
            }
        }
        debug!(
            symbol = %query.symbol,
            timeframe = %query.timeframe,
            bars = winners.len(),
            "range backfilled from durable tier"
        );
        Ok(winners)
    }

    /// Preload the memory tier with the durable winners of the trailing
    /// `lookback_ms` window ending at `now_ms`.
    pub fn warm_cache(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback_ms: i64,
        now_ms: i64,
    ) -> CacheResult<()> {
        if symbol.is_empty() {
            return Err(CacheError::InvalidInput("empty symbol".into()));
        }
        let start = now_ms.saturating_sub(lookback_ms.max(0));
        if start >= now_ms {
            return Ok(());
        }

        let epoch = self.write_epoch.load(Ordering::Acquire);
        let winners = self
            .store
            .winners_in_range(symbol, timeframe, start, now_ms)?;
        let mut mem = self.memory.lock();
        if self.write_epoch.load(Ordering::Acquire) == epoch {
            mem.note_range(symbol, timeframe, start, now_ms);
            for bar in &winners {
                mem.put(BarKey::new(symbol, timeframe, bar.timestamp), bar.clone());
            }
        }
        info!(symbol = %symbol, timeframe = %timeframe, bars = winners.len(), "memory tier warmed");
        Ok(())
    }

    pub fn clear_memory_cache(&self) {
        self.memory.lock().clear();
        info!("memory tier cleared");
    }

    /// Attach a correction subscriber; the returned handle detaches it.
    pub fn subscribe(
        &self,
        handler: impl Fn(&CorrectionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(handler)
    }

    /// Replace the side channel that receives subscriber failures.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.bus.set_error_sink(sink);
    }

    pub fn stats(&self) -> CacheStats {
        let mem = self.memory.lock();
        CacheStats {
            mem_cache_size: mem.size(),
            mem_capacity: mem.capacity(),
            subscriber_count: self.bus.listener_count(),
            mem_range_hits: self.counters.mem_range_hits.load(Ordering::Relaxed),
            store_range_reads: self.counters.store_range_reads.load(Ordering::Relaxed),
            bars_upserted: self.counters.bars_upserted.load(Ordering::Relaxed),
            corrections_published: self
                .counters
                .corrections_published
                .load(Ordering::Relaxed),
        }
    }

    pub fn freshness(&self) -> &FreshnessPolicy {
        &self.freshness
    }

    /// Advisory staleness for one bar under this cache's policy.
    pub fn is_stale(&self, bar: &Bar, timeframe: Timeframe, now_ms: i64) -> bool {
        self.freshness.is_stale(bar, timeframe, now_ms)
    }

    /// The stale subset of `bars`, in input order.
    pub fn stale_of<'a>(
        &self,
        bars: &'a [Bar],
        timeframe: Timeframe,
        now_ms: i64,
    ) -> Vec<&'a Bar> {
        self.freshness.stale_of(bars, timeframe, now_ms)
    }
}
