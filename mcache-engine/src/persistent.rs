//! # Persistent Engine
//!
//! Snapshot-backed variant of the in-memory engine. The node owns an opaque
//! directory (`data-dir/<nodeId>`); a JSON snapshot is written on `persist`
//! and `shutdown` and reloaded on construction, with remaining TTLs re-armed
//! relative to load time. Interchangeable with `MemoryEngine` behind
//! `Arc<dyn CacheEngine>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mcache_common::{CacheError, CacheResult, DataType};

use crate::engine::{CacheEngine, EngineStats};
use crate::eviction::EvictionKind;
use crate::memory::MemoryEngine;

const SNAPSHOT_FILE: &str = "snapshot.json";

/// One persisted entry. TTL is stored as the remaining seconds at snapshot
/// time; `-1` marks no expiry.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    value: Vec<u8>,
    data_type: DataType,
    ttl_seconds: i64,
    access_count: u64,
}

/// In-memory engine that survives restarts through snapshots.
pub struct PersistentEngine {
    memory: Arc<MemoryEngine>,
    snapshot_path: PathBuf,
}

impl PersistentEngine {
    /// Opens (or creates) the node's data directory and loads any existing
    /// snapshot. Entries whose TTL ran out while the node was down are
    /// dropped at load.
    pub fn open(dir: impl AsRef<Path>, max_size: usize, kind: EvictionKind) -> CacheResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let engine = PersistentEngine {
            memory: Arc::new(MemoryEngine::new(max_size, kind)),
            snapshot_path: dir.join(SNAPSHOT_FILE),
        };
        engine.load()?;
        Ok(engine)
    }

    /// Shared handle to the underlying in-memory engine, for sweeper wiring.
    pub fn memory(&self) -> Arc<MemoryEngine> {
        Arc::clone(&self.memory)
    }

    /// Writes the current live entries to the snapshot file.
    pub fn persist(&self) -> CacheResult<()> {
        let now = Instant::now();
        let entries: Vec<SnapshotEntry> = self
            .memory
            .export_entries()
            .into_iter()
            .map(|(key, entry)| SnapshotEntry {
                key,
                value: entry.value.to_vec(),
                data_type: entry.data_type,
                ttl_seconds: entry
                    .remaining_ttl(now)
                    .map(|remaining| remaining.as_secs() as i64)
                    .unwrap_or(-1),
                access_count: entry.access_count,
            })
            .collect();

        let encoded = serde_json::to_vec(&entries)
            .map_err(|err| CacheError::Snapshot(err.to_string()))?;
        fs::write(&self.snapshot_path, encoded)?;
        info!(
            entries = entries.len(),
            path = %self.snapshot_path.display(),
            "wrote snapshot"
        );
        Ok(())
    }

    fn load(&self) -> CacheResult<()> {
        let raw = match fs::read(&self.snapshot_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let entries: Vec<SnapshotEntry> = serde_json::from_slice(&raw)
            .map_err(|err| CacheError::Snapshot(err.to_string()))?;
        let count = entries.len();

        for entry in entries {
            // TTL 0 means the remainder ran out while the node was down.
            if entry.ttl_seconds == 0 {
                continue;
            }
            self.memory.set(
                &entry.key,
                Bytes::from(entry.value),
                entry.ttl_seconds,
                entry.data_type,
            )?;
        }
        info!(entries = count, "loaded snapshot");
        Ok(())
    }
}

impl CacheEngine for PersistentEngine {
    fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: i64,
        data_type: DataType,
    ) -> CacheResult<bool> {
        self.memory.set(key, value, ttl_seconds, data_type)
    }

    fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.memory.get(key)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        self.memory.delete(key)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        self.memory.exists(key)
    }

    fn expire(&self, key: &str, ttl_seconds: i64) -> CacheResult<bool> {
        self.memory.expire(key, ttl_seconds)
    }

    fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.memory.ttl(key)
    }

    fn flush(&self) -> CacheResult<()> {
        self.memory.flush()
    }

    fn stats(&self) -> EngineStats {
        self.memory.stats()
    }

    fn shutdown(&self) {
        if let Err(err) = self.persist() {
            warn!(error = %err, "snapshot on shutdown failed");
        }
        self.memory.shutdown();
    }
}
