// mcache-cluster - Cluster coordination for MeshCache
//
// The consistent-hash ring, the distributed cache manager that routes and
// fans out operations, the shared lock registry, and the defensive health
// monitor.

pub mod config;
pub mod discovery;
pub mod health;
pub mod lock;
pub mod manager;
pub mod ring;

pub use config::{ClusterConfig, WriteConcern};
pub use discovery::{NodeRecord, ServiceDiscovery, StaticDiscovery};
pub use health::{
    CachePinger, HealthConfig, HealthEvent, HealthMonitor, HealthSummary, MonitorHandle,
    NodeHealthState,
};
pub use lock::{
    AutoRenewalHandle, LockConfig, LockEntry, LockInfo, LockManager, LockRegistry, LockState,
    LockStats, LockType,
};
pub use manager::{CacheManager, ClusterStats, NodeStats};
pub use ring::{DistributionStats, HashRing};
