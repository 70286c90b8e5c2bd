//! Memory tier: bounded LRU over winning bars
//!
//! Keyed by (symbol, timeframe, timestamp). Recency is an ordered tick map;
//! promotion reinserts the entry under a fresh tick, so point operations
//! stay O(log n). A per-series timestamp index supports ordered range
//! scans.
//!
//! The tier cannot certify range completeness by itself because LRU
//! pressure evicts arbitrary keys. Coverage intervals close that gap: the
//! service notes a half-open range after backfilling it from the durable
//! tier, and every eviction punctures the covering interval at the evicted
//! timestamp. A range read is served from memory only while its interval is
//! still fully covered.

use crate::models::{Bar, BarKey, Timeframe};
use std::collections::{BTreeMap, HashMap};

type SeriesKey = (String, Timeframe);

#[derive(Debug)]
struct Entry {
    bar: Bar,
    tick: u64,
}

#[derive(Debug, Default)]
struct Series {
    /// Timestamps currently cached for this series.
    timestamps: BTreeMap<i64, ()>,
    /// Disjoint, merged coverage intervals, start -> end (half-open).
    coverage: BTreeMap<i64, i64>,
}

impl Series {
    fn note(&mut self, start: i64, end: i64) {
        let mut lo = start;
        let mut hi = end;
        // Absorb an interval that begins at or before the new start and
        // reaches it.
        if let Some((&s, &e)) = self.coverage.range(..=lo).next_back() {
            if e >= lo {
                lo = s;
                hi = hi.max(e);
                self.coverage.remove(&s);
            }
        }
        // Absorb intervals starting inside the (possibly grown) span.
        while let Some((&s, &e)) = self.coverage.range(lo..=hi).next() {
            hi = hi.max(e);
            self.coverage.remove(&s);
        }
        self.coverage.insert(lo, hi);
    }

    fn covers(&self, start: i64, end: i64) -> bool {
        match self.coverage.range(..=start).next_back() {
            Some((_, &e)) => e >= end,
            None => false,
        }
    }

    /// Drop one timestamp from any covering interval, splitting it.
    fn puncture(&mut self, timestamp: i64) {
        if let Some((&s, &e)) = self.coverage.range(..=timestamp).next_back() {
            if timestamp < e {
                self.coverage.remove(&s);
                if s < timestamp {
                    self.coverage.insert(s, timestamp);
                }
                if timestamp + 1 < e {
                    self.coverage.insert(timestamp + 1, e);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.timestamps.is_empty() && self.coverage.is_empty()
    }
}

/// Bounded LRU cache of winning bars with per-series range scans.
pub struct BarLruCache {
    capacity: usize,
    entries: HashMap<BarKey, Entry>,
    /// tick -> key, oldest first.
    recency: BTreeMap<u64, BarKey>,
    series: HashMap<SeriesKey, Series>,
    next_tick: u64,
}

impl BarLruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            series: HashMap::new(),
            next_tick: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, key: &BarKey) {
        let fresh = self.next_tick;
        if let Some(entry) = self.entries.get_mut(key) {
            let old = entry.tick;
            entry.tick = fresh;
            self.next_tick += 1;
            self.recency.remove(&old);
            self.recency.insert(fresh, key.clone());
        }
    }

    /// Point lookup; a hit promotes the entry to most-recently-used.
    pub fn get(&mut self, key: &BarKey) -> Option<Bar> {
        self.touch(key);
        self.entries.get(key).map(|e| e.bar.clone())
    }

    /// Insert or replace a winner. Replacement does not grow the count; an
    /// overflowing insert evicts the least-recently-used entry first.
    pub fn put(&mut self, key: BarKey, bar: Bar) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.touch(&key);
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.bar = bar;
            }
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        let tick = self.bump();
        self.recency.insert(tick, key.clone());
        self.series
            .entry((key.symbol.clone(), key.timeframe))
            .or_default()
            .timestamps
            .insert(key.timestamp, ());
        self.entries.insert(key, Entry { bar, tick });
    }

    /// Cached winners for `[start, end)` on one series, ascending by
    /// timestamp. Each returned entry is touched as most-recently-used.
    pub fn get_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Vec<Bar> {
        let skey = (symbol.to_string(), timeframe);
        let timestamps: Vec<i64> = match self.series.get(&skey) {
            Some(series) => series.timestamps.range(start..end).map(|(&t, _)| t).collect(),
            None => return Vec::new(),
        };
        let mut out = Vec::with_capacity(timestamps.len());
        for timestamp in timestamps {
            let key = BarKey::new(symbol, timeframe, timestamp);
            self.touch(&key);
            if let Some(entry) = self.entries.get(&key) {
                out.push(entry.bar.clone());
            }
        }
        out
    }

    /// Record that the cache holds every durable winner in `[start, end)`
    /// for the series. A zero-capacity cache never claims coverage.
    pub fn note_range(&mut self, symbol: &str, timeframe: Timeframe, start: i64, end: i64) {
        if self.capacity == 0 || start >= end {
            return;
        }
        self.series
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .note(start, end);
    }

    /// Whether `[start, end)` lies entirely inside noted coverage.
    pub fn covers(&self, symbol: &str, timeframe: Timeframe, start: i64, end: i64) -> bool {
        if start >= end {
            return true;
        }
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.covers(start, end))
            .unwrap_or(false)
    }

    /// Forget any coverage claim that includes `timestamp` for one series.
    /// Used when a durable winner may have changed without the tier seeing
    /// the new value; entries are left in place and get overwritten by the
    /// next read-through.
    pub fn puncture_coverage(&mut self, symbol: &str, timeframe: Timeframe, timestamp: i64) {
        let skey = (symbol.to_string(), timeframe);
        if let Some(series) = self.series.get_mut(&skey) {
            series.puncture(timestamp);
            if series.is_empty() {
                self.series.remove(&skey);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.series.clear();
    }

    fn evict_lru(&mut self) {
        let victim = self
            .recency
            .iter()
            .next()
            .map(|(&tick, key)| (tick, key.clone()));
        if let Some((tick, key)) = victim {
            self.recency.remove(&tick);
            self.entries.remove(&key);
            self.detach(&key);
        }
    }

    fn detach(&mut self, key: &BarKey) {
        let skey = (key.symbol.clone(), key.timeframe);
        if let Some(series) = self.series.get_mut(&skey) {
            series.timestamps.remove(&key.timestamp);
            series.puncture(key.timestamp);
            if series.is_empty() {
                self.series.remove(&skey);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(timestamp: i64, close: f64) -> Bar {
        Bar {
            timestamp,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1000.0,
            provider: "polygon".to_string(),
            revision: 1,
            fetched_at: timestamp + 60_000,
        }
    }

    fn key(timestamp: i64) -> BarKey {
        BarKey::new("AAPL", Timeframe::M5, timestamp)
    }

    #[test]
    fn test_capacity_bound_holds() {
        let mut cache = BarLruCache::new(3);
        for i in 0..10 {
            cache.put(key(i), bar(i, 100.0));
            assert!(cache.size() <= 3);
        }
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = BarLruCache::new(2);
        cache.put(key(1), bar(1, 100.0));
        cache.put(key(2), bar(2, 101.0));
        // Touch 1 so that 2 becomes the eviction victim.
        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), bar(3, 102.0));

        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn test_replace_does_not_grow() {
        let mut cache = BarLruCache::new(2);
        cache.put(key(1), bar(1, 100.0));
        cache.put(key(2), bar(2, 101.0));
        cache.put(key(1), bar(1, 200.0));
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get(&key(1)).unwrap().close, 200.0);
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn test_range_scan_sorted_and_bounded() {
        let mut cache = BarLruCache::new(10);
        for ts in [5, 1, 9, 3, 7] {
            cache.put(key(ts), bar(ts, ts as f64 + 100.0));
        }
        // Other series must not leak into the scan.
        cache.put(
            BarKey::new("TSLA", Timeframe::M5, 4),
            bar(4, 50.0),
        );
        cache.put(
            BarKey::new("AAPL", Timeframe::M1, 4),
            bar(4, 60.0),
        );

        let got = cache.get_range("AAPL", Timeframe::M5, 3, 9);
        let timestamps: Vec<i64> = got.iter().map(|b| b.timestamp).collect();
        assert_eq!(timestamps, vec![3, 5, 7]);
    }

    #[test]
    fn test_range_hit_promotes_entries() {
        let mut cache = BarLruCache::new(3);
        cache.put(key(1), bar(1, 100.0));
        cache.put(key(2), bar(2, 101.0));
        cache.put(key(3), bar(3, 102.0));

        // Touch 1 and 2 via a range read; 3 becomes the LRU victim.
        let got = cache.get_range("AAPL", Timeframe::M5, 1, 3);
        assert_eq!(got.len(), 2);
        cache.put(key(4), bar(4, 103.0));

        assert!(cache.get(&key(3)).is_none());
        assert!(cache.get(&key(1)).is_some());
    }

    #[test]
    fn test_coverage_note_merge_and_covers() {
        let mut cache = BarLruCache::new(10);
        cache.note_range("AAPL", Timeframe::M5, 0, 10);
        cache.note_range("AAPL", Timeframe::M5, 10, 20);
        cache.note_range("AAPL", Timeframe::M5, 30, 40);

        assert!(cache.covers("AAPL", Timeframe::M5, 0, 20));
        assert!(cache.covers("AAPL", Timeframe::M5, 5, 15));
        assert!(!cache.covers("AAPL", Timeframe::M5, 5, 35));
        assert!(cache.covers("AAPL", Timeframe::M5, 30, 40));
        assert!(!cache.covers("AAPL", Timeframe::M1, 0, 10));
        // Empty range is vacuously covered.
        assert!(cache.covers("AAPL", Timeframe::M5, 7, 7));
    }

    #[test]
    fn test_eviction_punctures_coverage() {
        let mut cache = BarLruCache::new(2);
        cache.note_range("AAPL", Timeframe::M5, 0, 10);
        cache.put(key(2), bar(2, 100.0));
        cache.put(key(5), bar(5, 101.0));
        assert!(cache.covers("AAPL", Timeframe::M5, 0, 10));

        // Overflow evicts ts=2 and splits the interval around it.
        cache.put(key(8), bar(8, 102.0));
        assert!(!cache.covers("AAPL", Timeframe::M5, 0, 10));
        assert!(!cache.covers("AAPL", Timeframe::M5, 2, 3));
        assert!(cache.covers("AAPL", Timeframe::M5, 0, 2));
        assert!(cache.covers("AAPL", Timeframe::M5, 3, 10));
    }

    #[test]
    fn test_puncture_coverage_keeps_entries() {
        let mut cache = BarLruCache::new(4);
        cache.put(key(5), bar(5, 100.0));
        cache.note_range("AAPL", Timeframe::M5, 0, 10);
        assert!(cache.covers("AAPL", Timeframe::M5, 0, 10));

        cache.puncture_coverage("AAPL", Timeframe::M5, 5);
        assert!(!cache.covers("AAPL", Timeframe::M5, 0, 10));
        assert!(cache.covers("AAPL", Timeframe::M5, 0, 5));
        // The entry itself survives; only the completeness claim is gone.
        assert!(cache.get(&key(5)).is_some());
    }

    #[test]
    fn test_clear_drops_entries_and_coverage() {
        let mut cache = BarLruCache::new(4);
        cache.note_range("AAPL", Timeframe::M5, 0, 10);
        cache.put(key(1), bar(1, 100.0));
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(!cache.covers("AAPL", Timeframe::M5, 0, 10));
        assert!(cache.get_range("AAPL", Timeframe::M5, 0, 10).is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_tier() {
        let mut cache = BarLruCache::new(0);
        cache.put(key(1), bar(1, 100.0));
        cache.note_range("AAPL", Timeframe::M5, 0, 10);
        assert_eq!(cache.size(), 0);
        assert!(cache.get(&key(1)).is_none());
        assert!(!cache.covers("AAPL", Timeframe::M5, 0, 10));
    }
}
