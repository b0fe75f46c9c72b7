//! # Cluster Configuration
//!
//! Tunables for routing, replication, and operation deadlines.

use std::time::Duration;

use mcache_common::HashAlgorithm;

/// How many replicas must report success before a write is acknowledged.
///
/// The dispatch always reaches every replica and always waits for all of
/// them; the concern only changes how the aggregate is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// One success is enough. Availability-oriented; replicas may diverge.
    Any,
    /// More than half of the replica set.
    Majority,
    /// Every replica.
    All,
}

impl WriteConcern {
    /// Successes required for a replica set of `replicas` nodes.
    pub fn required(&self, replicas: usize) -> usize {
        match self {
            WriteConcern::Any => 1,
            WriteConcern::Majority => replicas / 2 + 1,
            WriteConcern::All => replicas,
        }
    }
}

/// Cluster manager settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Virtual entries per physical node.
    pub virtual_nodes: usize,
    /// Replica set size when replication is enabled.
    pub replication_factor: usize,
    pub replication_enabled: bool,
    pub write_concern: WriteConcern,
    /// Deadline for point operations (GET/SET/DEL/EXISTS/EXPIRE/TTL).
    pub op_timeout: Duration,
    /// Deadline for FLUSH across all engines.
    pub flush_timeout: Duration,
    /// Concurrency bound for replica dispatch.
    pub max_parallel_dispatch: usize,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            virtual_nodes: 150,
            replication_factor: 1,
            replication_enabled: false,
            write_concern: WriteConcern::Any,
            op_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(10),
            max_parallel_dispatch: 16,
            hash_algorithm: HashAlgorithm::Md5,
        }
    }
}

impl ClusterConfig {
    /// Enables replication with the given factor.
    pub fn replicated(factor: usize) -> Self {
        ClusterConfig {
            replication_factor: factor.max(1),
            replication_enabled: factor > 1,
            ..ClusterConfig::default()
        }
    }
}
