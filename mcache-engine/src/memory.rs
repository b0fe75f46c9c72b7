//! # In-Memory Engine
//!
//! The default node backend: a bounded map with TTL-aware lookups, pluggable
//! eviction, and atomic statistics.
//!
//! ## Design Principles
//!
//! 1. **One Write Section**: Map and eviction policy mutate under the same
//!    lock so the policy's key set always equals the map's key set.
//! 2. **Lazy Expiry Fast Path**: Expiration is checked on access; the
//!    background sweeper only exists to bound memory for idle keys.
//! 3. **Atomic Stats**: Hit/miss/eviction counters stay off the lock.
//! 4. **Arc-backed Values**: Payloads are `Bytes`, cloned without copying.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use mcache_common::{CacheResult, DataType};

use crate::engine::{CacheEngine, EngineStats, TTL_MISSING, TTL_NO_EXPIRY};
use crate::entry::CacheEntry;
use crate::eviction::{EvictionKind, EvictionPolicy};

/// Map plus eviction state, guarded together.
struct EngineInner {
    map: HashMap<String, CacheEntry, RandomState>,
    policy: EvictionPolicy,
}

impl EngineInner {
    /// Removes a key from both structures. Returns the removed entry.
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.map.remove(key)?;
        self.policy.on_remove(key);
        Some(entry)
    }
}

/// Bounded in-memory implementation of `CacheEngine`.
pub struct MemoryEngine {
    inner: RwLock<EngineInner>,
    /// Maximum entry count; zero stores nothing.
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    shutdown: AtomicBool,
}

/// Handle for the background expiry sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl MemoryEngine {
    /// Creates an engine with the given capacity and eviction policy kind.
    pub fn new(max_size: usize, kind: EvictionKind) -> Self {
        Self::with_policy(max_size, EvictionPolicy::new(kind))
    }

    /// Creates an engine with an explicit policy value, so tests can inject
    /// a seeded random policy.
    pub fn with_policy(max_size: usize, policy: EvictionPolicy) -> Self {
        MemoryEngine {
            inner: RwLock::new(EngineInner {
                map: HashMap::with_hasher(RandomState::new()),
                policy,
            }),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Removes expired entries across the whole map.
    ///
    /// O(n) scan, intended for the periodic background sweep. Sweep removals
    /// count as neither hits nor evictions.
    pub fn purge_expired(&self, now: Instant) -> usize {
        if self.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            debug!(purged = expired.len(), "expiry sweep removed entries");
        }
        expired.len()
    }

    /// Starts a background thread that periodically purges expired entries.
    ///
    /// Intervals below one second are clamped up; the sweep is a safety net,
    /// not a latency path. The returned handle must be stopped to avoid
    /// leaking the thread.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let interval = interval.max(Duration::from_secs(1));

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let engine = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                if stop_thread.load(Ordering::Acquire) {
                    break;
                }
                engine.purge_expired(Instant::now());
            }
        });

        SweeperHandle {
            stop,
            join: Some(join),
        }
    }

    /// Copies out every live entry, for snapshot persistence.
    pub fn export_entries(&self) -> Vec<(String, CacheEntry)> {
        let now = Instant::now();
        let inner = self.inner.read();
        inner
            .map
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }
}

impl CacheEngine for MemoryEngine {
    fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: i64,
        data_type: DataType,
    ) -> CacheResult<bool> {
        if self.max_size == 0 {
            return Ok(false);
        }

        let now = Instant::now();
        let mut inner = self.inner.write();

        // A lingering expired entry under this key is replaced, not updated.
        if inner
            .map
            .get(key)
            .map(|entry| entry.is_expired(now))
            .unwrap_or(false)
        {
            inner.remove(key);
        }

        if inner.map.contains_key(key) {
            let entry = CacheEntry::new(value, data_type, ttl_seconds, now);
            inner.map.insert(key.to_string(), entry);
            inner.policy.on_access(key);
            return Ok(true);
        }

        // Capacity check applies to new keys only.
        if inner.map.len() >= self.max_size {
            if let Some(victim) = inner.policy.select_victim() {
                inner.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(victim = %victim, "evicted entry at capacity");
            }
        }

        let entry = CacheEntry::new(value, data_type, ttl_seconds, now);
        inner.map.insert(key.to_string(), entry);
        inner.policy.on_insert(key);
        Ok(true)
    }

    fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let expired = match inner.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if expired {
            inner.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let value = inner.map.get_mut(key).map(|entry| {
            entry.touch(now);
            entry.value.clone()
        });
        inner.policy.on_access(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        match inner.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write();

        match inner.map.get(key) {
            Some(entry) if entry.is_expired(now) => {
                inner.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn expire(&self, key: &str, ttl_seconds: i64) -> CacheResult<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let expired = match inner.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(false),
        };
        if expired {
            inner.remove(key);
            return Ok(false);
        }

        if let Some(entry) = inner.map.get_mut(key) {
            entry.set_ttl(ttl_seconds, now);
        }
        Ok(true)
    }

    fn ttl(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let expired = match inner.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(TTL_MISSING),
        };
        if expired {
            inner.remove(key);
            return Ok(TTL_MISSING);
        }

        let remaining = inner
            .map
            .get(key)
            .and_then(|entry| entry.remaining_ttl(now));
        match remaining {
            None => Ok(TTL_NO_EXPIRY),
            Some(duration) => Ok(duration.as_secs() as i64),
        }
    }

    fn flush(&self) -> CacheResult<()> {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.policy.clear();
        Ok(())
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.inner.read().map.len(),
        }
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
