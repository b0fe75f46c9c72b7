//! # Engine Contract
//!
//! The storage interface every node backend implements. The in-memory and
//! persistent engines are interchangeable behind `Arc<dyn CacheEngine>`;
//! the cluster manager only ever sees this trait.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use mcache_common::{CacheResult, DataType};

/// TTL answer for a missing key.
pub const TTL_MISSING: i64 = -2;

/// TTL answer for a key without expiry.
pub const TTL_NO_EXPIRY: i64 = -1;

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Local storage backend for one node.
///
/// All operations on a single key appear atomic and totally ordered. Callers
/// treat an absent key as a normal outcome, never an error.
pub trait CacheEngine: Send + Sync {
    /// Stores a value. Negative `ttl_seconds` means no expiry. Returns true
    /// when the value was stored.
    fn set(&self, key: &str, value: Bytes, ttl_seconds: i64, data_type: DataType)
        -> CacheResult<bool>;

    /// Returns the value and touches access metadata. A lazily-expired entry
    /// is removed and reported as absent.
    fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Removes a key. Returns true when a live entry was removed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Returns true when a live (non-expired) entry exists. Does not touch
    /// access metadata.
    fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Replaces the expiry deadline. Returns false when the key is absent.
    fn expire(&self, key: &str, ttl_seconds: i64) -> CacheResult<bool>;

    /// Remaining TTL in seconds, `TTL_NO_EXPIRY` for keys without expiry,
    /// `TTL_MISSING` for absent keys.
    fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// Removes every entry.
    fn flush(&self) -> CacheResult<()>;

    /// Current counters.
    fn stats(&self) -> EngineStats;

    /// Stops background work. Safe to call more than once.
    fn shutdown(&self);
}
