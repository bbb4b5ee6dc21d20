use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedInterval {
    hours: f64,
    stored_at_ms: u64,
}

/// Per-symbol funding interval cache with a fixed TTL.
///
/// Concurrent misses for the same symbol may both compute and insert; the
/// last write wins and the values agree.
#[derive(Clone)]
pub struct IntervalCache {
    inner: Arc<DashMap<String, CachedInterval>>,
    ttl_ms: u64,
}

impl IntervalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    pub fn is_fresh(now_ms: u64, stored_at_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(stored_at_ms) < ttl_ms
    }

    pub fn get(&self, symbol: &str, now_ms: u64) -> Option<f64> {
        self.inner
            .get(symbol)
            .filter(|e| Self::is_fresh(now_ms, e.stored_at_ms, self.ttl_ms))
            .map(|e| e.hours)
    }

    pub fn insert(&self, symbol: &str, hours: f64, now_ms: u64) {
        self.inner.insert(
            symbol.to_string(),
            CachedInterval {
                hours,
                stored_at_ms: now_ms,
            },
        );
    }

    /// Drops stale entries, returning how many were removed. Safe to call
    /// while other tasks insert.
    pub fn evict_expired(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.inner.retain(|_, e| {
            let keep = Self::is_fresh(now_ms, e.stored_at_ms, self.ttl_ms);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
