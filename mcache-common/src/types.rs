//! # Cluster Type Definitions
//!
//! Node identity and the value-type tag carried by every cache entry.
//!
//! ## Design Principles
//!
//! 1. **Identity By Id**: `CacheNode` equality and hashing use only the node
//!    id, so a node whose health status changes still matches ring entries.
//! 2. **Transparent Tags**: `DataType` is stored and echoed back untouched;
//!    the engine never interprets the payload.
//! 3. **Serde At The Edge**: All types serialize for the HTTP surface and
//!    snapshot files without bespoke encoders.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Value-type tag carried by a cache entry.
///
/// The engine treats payloads as opaque bytes; the tag exists so clients can
/// round-trip their own typing through the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    List,
    Set,
    Hash,
    SortedSet,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::String
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "STRING",
            DataType::List => "LIST",
            DataType::Set => "SET",
            DataType::Hash => "HASH",
            DataType::SortedSet => "SORTED_SET",
        };
        f.write_str(name)
    }
}

impl DataType {
    /// Parses the wire-level tag name. Case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "STRING" => Some(DataType::String),
            "LIST" => Some(DataType::List),
            "SET" => Some(DataType::Set),
            "HASH" => Some(DataType::Hash),
            "SORTED_SET" => Some(DataType::SortedSet),
            _ => None,
        }
    }
}

/// Liveness status of a cluster node as seen by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Unknown,
    Healthy,
    Degraded,
    Unreachable,
    Stale,
}

impl NodeStatus {
    /// Returns true for the one status that counts as passing a check.
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeStatus::Healthy)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Unknown => "UNKNOWN",
            NodeStatus::Healthy => "HEALTHY",
            NodeStatus::Degraded => "DEGRADED",
            NodeStatus::Unreachable => "UNREACHABLE",
            NodeStatus::Stale => "STALE",
        };
        f.write_str(name)
    }
}

/// A physical cluster member.
///
/// Status is advisory metadata; two `CacheNode` values with the same id are
/// the same node regardless of status, which keeps ring membership stable
/// while the health monitor updates its view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheNode {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
}

impl CacheNode {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        CacheNode {
            id: id.into(),
            host: host.into(),
            port,
            status: NodeStatus::Unknown,
        }
    }

    /// Returns the `host:port` dial address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Identity by id only.
impl PartialEq for CacheNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CacheNode {}

impl Hash for CacheNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for CacheNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}
