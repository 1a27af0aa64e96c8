//! Generic TTL + LRU key/value cache.
//!
//! Expiry is checked lazily on every read and proactively by a periodic
//! sweep, so expired entries never outlive the sweep interval. Eviction on a
//! full insert removes the least recently *accessed* entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Time source for the cache, injectable so expiry can be tested without
/// sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    inserted_at: Instant,
    ttl: Duration,
    access_count: u64,
    last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Point-in-time view of cache usage. Purely observational.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Key with the highest access count, and that count.
    pub most_accessed: Option<(String, u64)>,
    pub least_recently_used: Option<String>,
}

pub struct ContentCache<V> {
    state: Mutex<CacheState<V>>,
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ContentCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self::with_clock(capacity, default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace `key`. A new key on a full cache evicts expired
    /// entries first, then the least recently accessed one.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = self.clock.now();
        let mut state = self.state();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            state.entries.retain(|_, entry| !entry.is_expired(now));

            if state.entries.len() >= self.capacity {
                let lru_key = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_accessed_at)
                    .map(|(k, _)| k.clone());
                if let Some(lru_key) = lru_key {
                    debug!(key = %lru_key, "evicting least recently used cache entry");
                    state.entries.remove(&lru_key);
                }
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                data: value,
                inserted_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                access_count: 0,
                last_accessed_at: now,
            },
        );
    }

    /// Fetch a live entry. An expired entry is removed and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.state();

        let expired = match state.entries.get(key).map(|entry| entry.is_expired(now)) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(expired) => expired,
        };

        if expired {
            state.entries.remove(key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        Some(entry.data.clone())
    }

    /// True when `key` holds a live entry. Does not count as an access.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state();
        match state.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(true) => {
                state.entries.remove(key);
                false
            }
            Some(false) => true,
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
    }

    /// Physical entry count, including expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let lookups = state.hits + state.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };

        CacheStats {
            size: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            most_accessed: state
                .entries
                .iter()
                .max_by_key(|(_, e)| e.access_count)
                .map(|(k, e)| (k.clone(), e.access_count)),
            least_recently_used: state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed_at)
                .map(|(k, _)| k.clone()),
        }
    }
}

impl<V: Clone + Send + 'static> ContentCache<V> {
    /// Run [`ContentCache::sweep`] every `interval` until `cancel` fires or
    /// the cache is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}
