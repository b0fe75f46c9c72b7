//! # Service Discovery Interface
//!
//! The health monitor consumes this and nothing more. The in-tree static
//! implementation covers fixed cluster lists and tests; a real registry can
//! be dropped in behind the same trait.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use mcache_common::CacheNode;

/// A node as known to service discovery.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// Most recent heartbeat, when the discovery backend can supply one.
    /// Without this signal the monitor's STALE classification is
    /// unreachable.
    pub last_heartbeat: Option<SystemTime>,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        NodeRecord {
            node_id: node_id.into(),
            host: host.into(),
            port,
            last_heartbeat: None,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&CacheNode> for NodeRecord {
    fn from(node: &CacheNode) -> Self {
        NodeRecord::new(node.id.clone(), node.host.clone(), node.port)
    }
}

/// Read-only view of cluster membership.
pub trait ServiceDiscovery: Send + Sync {
    fn all_nodes(&self) -> Vec<NodeRecord>;

    fn find(&self, node_id: &str) -> Option<NodeRecord> {
        self.all_nodes()
            .into_iter()
            .find(|record| record.node_id == node_id)
    }
}

/// Fixed node list with optional heartbeat recording.
#[derive(Default)]
pub struct StaticDiscovery {
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        StaticDiscovery::default()
    }

    pub fn with_nodes(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let discovery = StaticDiscovery::new();
        for record in records {
            discovery.register(record);
        }
        discovery
    }

    pub fn register(&self, record: NodeRecord) {
        self.nodes.write().insert(record.node_id.clone(), record);
    }

    pub fn deregister(&self, node_id: &str) -> bool {
        self.nodes.write().remove(node_id).is_some()
    }

    /// Stamps the node's heartbeat with the current time.
    pub fn record_heartbeat(&self, node_id: &str) -> bool {
        match self.nodes.write().get_mut(node_id) {
            Some(record) => {
                record.last_heartbeat = Some(SystemTime::now());
                true
            }
            None => false,
        }
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn all_nodes(&self) -> Vec<NodeRecord> {
        self.nodes.read().values().cloned().collect()
    }

    fn find(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.read().get(node_id).cloned()
    }
}
