use crate::models::now_ms;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A held lock older than this is presumed abandoned by a crashed holder.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Pure expiry check, independent of the wall clock.
pub fn is_expired(now_ms: u64, acquired_at_ms: u64, timeout_ms: u64) -> bool {
    now_ms.saturating_sub(acquired_at_ms) >= timeout_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LockStatus {
    pub locked: bool,
    pub age_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    acquired_at_ms: u64,
    /// Unique per acquisition, so a superseded handle can tell it no longer
    /// owns the entry even when the timestamps collide.
    generation: u64,
}

/// In-process, non-blocking named locks with self-healing expiry.
///
/// Only guards against overlapping runs inside one process; separate
/// replicas do not see each other's entries.
#[derive(Clone)]
pub struct ExecutionGuard {
    locks: Arc<DashMap<String, LockEntry>>,
    generations: Arc<AtomicU64>,
    timeout_ms: u64,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::with_timeout(LOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, now_ms())
    }

    pub fn try_acquire_at(&self, key: &str, now_ms: u64) -> bool {
        self.claim(key, now_ms).is_some()
    }

    /// Check-and-set under the shard lock, so two callers can't both win.
    /// Returns the generation of the new entry.
    fn claim(&self, key: &str, now_ms: u64) -> Option<u64> {
        let entry = LockEntry {
            acquired_at_ms: now_ms,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
        };

        match self.locks.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                tracing::debug!("[guard] lock acquired for {key:?}");
                Some(entry.generation)
            }
            Entry::Occupied(mut slot) => {
                let held_since = slot.get().acquired_at_ms;
                let age_secs = now_ms.saturating_sub(held_since) / 1000;
                if is_expired(now_ms, held_since, self.timeout_ms) {
                    tracing::warn!("[guard] taking over stale lock {key:?} (age {age_secs}s)");
                    slot.insert(entry);
                    Some(entry.generation)
                } else {
                    tracing::info!("[guard] lock already held for {key:?} (age {age_secs}s)");
                    None
                }
            }
        }
    }

    /// Like [`try_acquire`](Self::try_acquire) but returns a handle that
    /// releases on drop.
    pub fn acquire(&self, key: &str) -> Option<LockHandle> {
        self.acquire_at(key, now_ms())
    }

    pub fn acquire_at(&self, key: &str, now_ms: u64) -> Option<LockHandle> {
        let generation = self.claim(key, now_ms)?;
        Some(LockHandle {
            guard: self.clone(),
            key: key.to_string(),
            generation,
        })
    }

    pub fn release(&self, key: &str) {
        self.locks.remove(key);
        tracing::debug!("[guard] lock released for {key:?}");
    }

    pub fn status(&self, key: &str) -> Option<LockStatus> {
        self.status_at(key, now_ms())
    }

    pub fn status_at(&self, key: &str, now_ms: u64) -> Option<LockStatus> {
        let held_since = self.locks.get(key)?.acquired_at_ms;
        Some(LockStatus {
            locked: !is_expired(now_ms, held_since, self.timeout_ms),
            age_secs: now_ms.saturating_sub(held_since) / 1000,
        })
    }
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its lock when dropped, unless a later holder has since taken
/// over the expired entry.
pub struct LockHandle {
    guard: ExecutionGuard,
    key: String,
    generation: u64,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let ours = self.generation;
        let removed = self
            .guard
            .locks
            .remove_if(&self.key, |_, entry| entry.generation == ours);
        if removed.is_some() {
            tracing::debug!("[guard] lock released for {:?}", self.key);
        }
    }
}
