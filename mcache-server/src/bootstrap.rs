//! # Node Bootstrap
//!
//! Turns a resolved configuration into a running set of components: one
//! engine per cluster member, the cache manager, the lock registry, service
//! discovery, and the health monitor.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use mcache_cluster::{
    CacheManager, ClusterConfig, HealthConfig, HealthMonitor, LockConfig, LockManager,
    LockRegistry, NodeRecord, StaticDiscovery,
};
use mcache_engine::{
    CacheEngine, EvictionKind, MemoryEngine, PersistentEngine, SweeperHandle,
};

use crate::config::ServerConfig;
use crate::server::ServerContext;

/// Default per-engine capacity.
const DEFAULT_MAX_KEYS: usize = 100_000;

/// Engine expiry sweep cadence.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Replica set size used in cluster mode.
const CLUSTER_REPLICATION_FACTOR: usize = 2;

/// A fully wired node, ready to serve.
pub struct Node {
    pub config: ServerConfig,
    pub context: ServerContext,
    pub monitor: Arc<HealthMonitor>,
    pub discovery: Arc<StaticDiscovery>,
    pub registry: Arc<LockRegistry>,
    sweepers: Vec<SweeperHandle>,
}

impl Node {
    /// Stops every background task and engine. Call once, at exit.
    pub fn shutdown(self) {
        self.context.manager.shutdown();
        self.registry.shutdown();
        self.monitor.shutdown();
        for sweeper in self.sweepers {
            sweeper.stop();
        }
    }
}

/// Builds every component from the resolved configuration. Must run inside
/// a tokio runtime: the lock sweeper is a spawned task.
pub fn build_node(config: ServerConfig) -> anyhow::Result<Node> {
    let cluster_config = if config.cluster_mode && config.nodes.len() >= 2 {
        ClusterConfig::replicated(CLUSTER_REPLICATION_FACTOR)
    } else {
        ClusterConfig::default()
    };

    let manager = Arc::new(CacheManager::new(cluster_config, config.node_id.clone()));
    let discovery = Arc::new(StaticDiscovery::new());
    let mut sweepers = Vec::new();

    for node in &config.nodes {
        let memory;
        let engine: Arc<dyn CacheEngine> = if config.persistence_enabled {
            let dir = config.node_data_dir(&node.id);
            let persistent = PersistentEngine::open(&dir, DEFAULT_MAX_KEYS, EvictionKind::Lru)
                .with_context(|| format!("opening data dir {}", dir.display()))?;
            memory = persistent.memory();
            Arc::new(persistent)
        } else {
            let engine = Arc::new(MemoryEngine::new(DEFAULT_MAX_KEYS, EvictionKind::Lru));
            memory = Arc::clone(&engine);
            engine
        };
        sweepers.push(memory.start_sweeper(SWEEP_INTERVAL));

        manager.add_node(node.clone(), engine);
        discovery.register(NodeRecord::from(node));
    }
    info!(
        node = %config.node_id,
        members = config.nodes.len(),
        persistence = config.persistence_enabled,
        "node assembled"
    );

    let registry = Arc::new(LockRegistry::new(LockConfig::default()));
    registry.start_sweeper();
    let locks = LockManager::new(Arc::clone(&registry), config.node_id.clone());

    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&discovery) as Arc<dyn mcache_cluster::ServiceDiscovery>,
        HealthConfig::default(),
    ));

    Ok(Node {
        context: ServerContext {
            manager,
            locks,
        },
        config,
        monitor,
        discovery,
        registry,
        sweepers,
    })
}
