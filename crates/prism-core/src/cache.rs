//! In-memory result cache keyed by request fingerprint.
//!
//! Entries expire after their TTL and are evicted least-recently-used once the
//! entry bound is reached. All access goes through one mutex that is never
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::CacheConfig;
use crate::pipeline::hash::Fingerprint;
use crate::types::AnalysisResult;

/// Cache entry with expiration and recency stamp.
struct CacheEntry {
    result: AnalysisResult,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
    last_used: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Monotonic access counter used as the LRU clock
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before - self.entries.len()
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k);
        match victim {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held (expired entries may linger until touched)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
}

/// Memoizes analysis results by fingerprint.
pub struct ResultCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    /// Create a cache bounded to `max_entries`. Zero disables storage entirely.
    ///
    /// Choosing an eviction victim scans every entry, so an insert into a
    /// full cache costs O(`max_entries`).
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::new(config.max_entries)
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned guard is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up an unexpired result, refreshing its recency.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<AnalysisResult> {
        if !self.is_enabled() {
            return None;
        }
        let now = Instant::now();
        let mut state = self.lock();
        let tick = state.next_tick();

        let hit = match state.entries.get_mut(fingerprint) {
            Some(entry) if entry.is_live(now) => {
                entry.last_used = tick;
                Some(entry.result.clone())
            }
            _ => None,
        };
        if hit.is_none() && state.entries.remove(fingerprint).is_some() {
            debug!(fingerprint = %fingerprint.short(), "cache expired");
        }

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint.short(), "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint.short(), "cache miss");
        }
        hit
    }

    /// Store a result for `ttl`, evicting the least recently used entry if full.
    ///
    /// A TTL too large to represent (e.g. `Duration::MAX`) never expires.
    pub fn put(&self, fingerprint: Fingerprint, result: AnalysisResult, ttl: Duration) {
        if !self.is_enabled() {
            return;
        }
        let now = Instant::now();
        let mut state = self.lock();

        if !state.entries.contains_key(&fingerprint) && state.entries.len() >= self.max_entries {
            // Expired entries go first; only then sacrifice a live one
            if state.purge_expired(now) == 0 && state.evict_lru() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let last_used = state.next_tick();
        state.entries.insert(
            fingerprint,
            CacheEntry {
                result,
                expires_at: now.checked_add(ttl),
                last_used,
            },
        );
        debug!(
            fingerprint = %fingerprint.short(),
            ttl_secs = ttl.as_secs(),
            "cached"
        );
    }

    /// Drop one entry.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().entries.remove(fingerprint).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
        debug!("cleared result cache");
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
