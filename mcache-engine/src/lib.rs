// mcache-engine - Local cache engine for MeshCache nodes
//
// A bounded in-memory store with TTL expiry, pluggable eviction, and atomic
// statistics, plus a snapshot-backed variant for persistent nodes.

pub mod engine;
pub mod entry;
pub mod eviction;
pub mod memory;
pub mod persistent;

pub use engine::{CacheEngine, EngineStats};
pub use entry::CacheEntry;
pub use eviction::{EvictionKind, EvictionPolicy};
pub use memory::{MemoryEngine, SweeperHandle};
pub use persistent::PersistentEngine;
