//! # Cache Entry
//!
//! Value plus the metadata the engine needs for TTL expiry and eviction
//! decisions. The payload is opaque; only the tag travels with it.

use std::time::{Duration, Instant};

use bytes::Bytes;

use mcache_common::DataType;

/// A single stored value with its access and expiry metadata.
///
/// Invariant: `last_accessed >= created_at`. The entry is expired iff
/// `expires_at` is set and has passed.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub data_type: DataType,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub last_accessed: Instant,
    pub access_count: u64,
}

impl CacheEntry {
    /// Creates an entry at `now`. A negative `ttl_seconds` means no expiry.
    pub fn new(value: Bytes, data_type: DataType, ttl_seconds: i64, now: Instant) -> Self {
        CacheEntry {
            value,
            data_type,
            created_at: now,
            expires_at: expiry_from_ttl(ttl_seconds, now),
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Returns true when the entry has expired at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }

    /// Marks the entry as accessed.
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Replaces the expiry deadline. Negative TTL clears it.
    pub fn set_ttl(&mut self, ttl_seconds: i64, now: Instant) {
        self.expires_at = expiry_from_ttl(ttl_seconds, now);
    }

    /// Remaining lifetime at `now`; `None` when the entry never expires.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

fn expiry_from_ttl(ttl_seconds: i64, now: Instant) -> Option<Instant> {
    if ttl_seconds < 0 {
        None
    } else {
        Some(now + Duration::from_secs(ttl_seconds as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new(Bytes::from_static(b"v"), DataType::String, -1, now);
        assert!(!entry.is_expired(now + Duration::from_secs(3600)));
        assert_eq!(entry.remaining_ttl(now), None);
    }

    #[test]
    fn positive_ttl_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new(Bytes::from_static(b"v"), DataType::String, 2, now);
        assert!(!entry.is_expired(now + Duration::from_secs(1)));
        assert!(entry.is_expired(now + Duration::from_secs(2)));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let now = Instant::now();
        let entry = CacheEntry::new(Bytes::from_static(b"v"), DataType::String, 0, now);
        assert!(entry.is_expired(now));
    }

    #[test]
    fn touch_updates_metadata() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(Bytes::from_static(b"v"), DataType::String, -1, now);
        let later = now + Duration::from_millis(10);
        entry.touch(later);
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed >= entry.created_at);
    }

    #[test]
    fn set_ttl_clears_with_negative() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(Bytes::from_static(b"v"), DataType::String, 5, now);
        entry.set_ttl(-1, now);
        assert_eq!(entry.expires_at, None);
    }
}
