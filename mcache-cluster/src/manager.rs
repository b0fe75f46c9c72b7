//! # Distributed Cache Manager
//!
//! Routes commands to replica sets, fans out writes, and races reads.
//!
//! ## Design Principles
//!
//! 1. **Replicas From The Ring**: The replica set for a key is whatever the
//!    ring answers at dispatch time; membership and routing never disagree.
//! 2. **All-Complete, Any-Success Writes**: A write reaches every replica
//!    and waits for all of them; the configured write concern then judges
//!    the aggregate. Partial failures are logged, not propagated, while the
//!    concern is met. No repair is attempted afterwards.
//! 3. **First-Completion Reads**: A read returns the first replica answer,
//!    including a miss; replicas are not reconciled.
//! 4. **Responses At The Edge**: `execute` converts every internal failure
//!    into a `Response`; nothing else crosses the wire boundary.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use mcache_common::{CacheError, CacheNode, CacheResult, Command, DataType, Response};
use mcache_engine::{CacheEngine, EngineStats};

use crate::config::ClusterConfig;
use crate::ring::{DistributionStats, HashRing};

/// Per-node counters plus ring distribution, for CLUSTER_STATS.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub nodes: Vec<NodeStats>,
    pub totals: EngineStats,
    pub distribution: DistributionStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub stats: EngineStats,
}

/// A write replicated to every node in a key's replica set.
#[derive(Debug, Clone)]
enum WriteOp {
    Set {
        key: String,
        value: Bytes,
        ttl_seconds: i64,
        data_type: DataType,
    },
    Delete {
        key: String,
    },
    Expire {
        key: String,
        ttl_seconds: i64,
    },
}

fn apply_write(engine: &dyn CacheEngine, op: &WriteOp) -> CacheResult<bool> {
    match op {
        WriteOp::Set {
            key,
            value,
            ttl_seconds,
            data_type,
        } => engine.set(key, value.clone(), *ttl_seconds, *data_type),
        WriteOp::Delete { key } => engine.delete(key),
        WriteOp::Expire { key, ttl_seconds } => engine.expire(key, *ttl_seconds),
    }
}

/// Routes operations across the cluster's local engines.
pub struct CacheManager {
    config: ClusterConfig,
    local_node_id: String,
    ring: Arc<HashRing>,
    engines: RwLock<HashMap<String, Arc<dyn CacheEngine>>>,
    dispatch_permits: Arc<Semaphore>,
    shutdown: AtomicBool,
}

impl CacheManager {
    pub fn new(config: ClusterConfig, local_node_id: impl Into<String>) -> Self {
        let ring = Arc::new(HashRing::new(config.virtual_nodes, config.hash_algorithm));
        let permits = Arc::new(Semaphore::new(config.max_parallel_dispatch.max(1)));
        CacheManager {
            config,
            local_node_id: local_node_id.into(),
            ring,
            engines: RwLock::new(HashMap::new()),
            dispatch_permits: permits,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn ring(&self) -> Arc<HashRing> {
        Arc::clone(&self.ring)
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// Registers a node and its engine, and places it on the ring.
    pub fn add_node(&self, node: CacheNode, engine: Arc<dyn CacheEngine>) {
        self.engines.write().insert(node.id.clone(), engine);
        self.ring.add_node(&node);
        debug!(node = %node.id, "node joined cluster");
    }

    /// Removes a node from the ring and shuts its engine down. Keys routed
    /// to it are re-routed by hash; no data moves.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let removed = self.ring.remove_node(node_id);
        if let Some(engine) = self.engines.write().remove(node_id) {
            engine.shutdown();
        }
        removed
    }

    /// The ordered replica set for a key: just the primary when replication
    /// is disabled, otherwise a clockwise walk of `replication_factor`
    /// distinct nodes.
    pub fn replication_nodes(&self, key: &str) -> Vec<CacheNode> {
        if !self.config.replication_enabled {
            return self.ring.node_for(key).into_iter().collect();
        }
        self.ring.nodes_for(key, self.config.replication_factor)
    }

    pub async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: i64,
        data_type: DataType,
    ) -> CacheResult<bool> {
        self.write_fanout(
            key,
            WriteOp::Set {
                key: key.to_string(),
                value,
                ttl_seconds,
                data_type,
            },
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.write_fanout(
            key,
            WriteOp::Delete {
                key: key.to_string(),
            },
        )
        .await
    }

    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> CacheResult<bool> {
        self.write_fanout(
            key,
            WriteOp::Expire {
                key: key.to_string(),
                ttl_seconds,
            },
        )
        .await
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let key_owned = key.to_string();
        self.read_race(key, move |engine| engine.get(&key_owned))
            .await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key_owned = key.to_string();
        self.read_race(key, move |engine| engine.exists(&key_owned))
            .await
    }

    /// TTL is answered by the primary alone; reconciling divergent TTLs
    /// across replicas would be meaningless.
    pub async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.ensure_running()?;
        let primary = self.ring.node_for(key).ok_or(CacheError::RingEmpty)?;
        let engine = self
            .engine_for(&primary.id)
            .ok_or_else(|| CacheError::NodeNotFound(primary.id.clone()))?;
        engine.ttl(key)
    }

    /// Flushes every known engine; not routed by hash.
    pub async fn flush(&self) -> CacheResult<()> {
        self.ensure_running()?;
        let engines: Vec<(String, Arc<dyn CacheEngine>)> = self
            .engines
            .read()
            .iter()
            .map(|(id, engine)| (id.clone(), Arc::clone(engine)))
            .collect();

        let tasks = engines.into_iter().map(|(node_id, engine)| {
            tokio::spawn(async move { (node_id, engine.flush()) })
        });

        let joined = timeout(self.config.flush_timeout, join_all(tasks))
            .await
            .map_err(|_| CacheError::Timeout)?;

        for outcome in joined {
            match outcome {
                Ok((node_id, Err(err))) => {
                    warn!(node = %node_id, error = %err, "flush failed on node");
                    return Err(err);
                }
                Ok((_, Ok(()))) => {}
                Err(err) => return Err(CacheError::Engine(err.to_string())),
            }
        }
        Ok(())
    }

    /// Per-node counters plus ring distribution.
    pub fn cluster_stats(&self) -> ClusterStats {
        let engines = self.engines.read();
        let mut nodes: Vec<NodeStats> = engines
            .iter()
            .map(|(node_id, engine)| NodeStats {
                node_id: node_id.clone(),
                stats: engine.stats(),
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let totals = nodes.iter().fold(EngineStats::default(), |mut acc, node| {
            acc.hits += node.stats.hits;
            acc.misses += node.stats.misses;
            acc.evictions += node.stats.evictions;
            acc.size += node.stats.size;
            acc
        });

        ClusterStats {
            nodes,
            totals,
            distribution: self.ring.distribution_stats(),
        }
    }

    /// Converts a command into a response. No error escapes this boundary.
    pub async fn execute(&self, command: Command) -> Response {
        if let Err(err) = command.validate() {
            return err.into();
        }

        let result = self.dispatch(command).await;
        match result {
            Ok(response) => response,
            Err(err) => {
                if !matches!(err, CacheError::Timeout) {
                    warn!(error = %err, "command failed");
                }
                err.into()
            }
        }
    }

    async fn dispatch(&self, command: Command) -> CacheResult<Response> {
        match command {
            Command::Get { key } => Ok(match self.get(&key).await? {
                Some(value) => Response::bytes(value),
                None => Response::NotFound,
            }),
            Command::Set {
                key,
                value,
                ttl_seconds,
                data_type,
            } => {
                if self.set(&key, value, ttl_seconds, data_type).await? {
                    Ok(Response::ok())
                } else {
                    Ok(Response::Error("write concern not met".to_string()))
                }
            }
            Command::Del { key } => {
                let removed = self.delete(&key).await?;
                Ok(Response::integer(removed as i64))
            }
            Command::Exists { key } => {
                let present = self.exists(&key).await?;
                Ok(Response::integer(present as i64))
            }
            Command::Expire { key, ttl_seconds } => {
                let applied = self.expire(&key, ttl_seconds).await?;
                Ok(Response::integer(applied as i64))
            }
            Command::Ttl { key } => Ok(Response::integer(self.ttl(&key).await?)),
            Command::Flush => {
                self.flush().await?;
                Ok(Response::ok())
            }
            Command::Ping { payload } => Ok(match payload {
                Some(data) => Response::bytes(data),
                None => Response::text("PONG"),
            }),
            Command::Info => Ok(Response::text(self.info_text())),
            Command::Stats => {
                let stats = self.local_stats();
                let text = serde_json::to_string(&stats)
                    .map_err(|err| CacheError::Engine(err.to_string()))?;
                Ok(Response::text(text))
            }
            Command::ClusterInfo => Ok(Response::text(self.info_text())),
            Command::ClusterNodes => {
                let nodes = self.ring.nodes();
                let text = serde_json::to_string(&nodes)
                    .map_err(|err| CacheError::Engine(err.to_string()))?;
                Ok(Response::text(text))
            }
            Command::ClusterStats => {
                let stats = self.cluster_stats();
                let text = serde_json::to_string(&stats)
                    .map_err(|err| CacheError::Engine(err.to_string()))?;
                Ok(Response::text(text))
            }
        }
    }

    /// Stops accepting operations and shuts every engine down. In-flight
    /// callers observe TIMEOUT.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        for engine in self.engines.read().values() {
            engine.shutdown();
        }
    }

    fn ensure_running(&self) -> CacheResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(CacheError::ShuttingDown);
        }
        Ok(())
    }

    fn engine_for(&self, node_id: &str) -> Option<Arc<dyn CacheEngine>> {
        self.engines.read().get(node_id).cloned()
    }

    fn local_stats(&self) -> EngineStats {
        self.engine_for(&self.local_node_id)
            .map(|engine| engine.stats())
            .unwrap_or_else(|| self.cluster_stats().totals)
    }

    fn info_text(&self) -> String {
        let distribution = self.ring.distribution_stats();
        format!(
            "node_id:{}\r\nnodes:{}\r\nreplication_enabled:{}\r\nreplication_factor:{}\r\nvirtual_nodes:{}\r\nring_entries:{}\r\nring_stddev:{:.2}\r\n",
            self.local_node_id,
            self.ring.node_count(),
            self.config.replication_enabled,
            self.config.replication_factor,
            self.config.virtual_nodes,
            self.ring.len(),
            distribution.std_dev,
        )
    }

    /// Dispatches a write to every replica, waits for all, and judges the
    /// aggregate against the write concern.
    async fn write_fanout(&self, key: &str, op: WriteOp) -> CacheResult<bool> {
        self.ensure_running()?;
        let replicas = self.replication_nodes(key);
        if replicas.is_empty() {
            return Err(CacheError::RingEmpty);
        }

        let mut tasks = Vec::with_capacity(replicas.len());
        for node in &replicas {
            let engine = match self.engine_for(&node.id) {
                Some(engine) => engine,
                None => {
                    warn!(node = %node.id, "replica has no engine registered");
                    continue;
                }
            };
            let op = op.clone();
            let permits = Arc::clone(&self.dispatch_permits);
            tasks.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| CacheError::Engine("dispatch pool closed".to_string()))?;
                apply_write(engine.as_ref(), &op)
            }));
        }
        if tasks.is_empty() {
            return Err(CacheError::Engine("no replica engines".to_string()));
        }

        let joined = timeout(self.config.op_timeout, join_all(tasks))
            .await
            .map_err(|_| CacheError::Timeout)?;

        let results: Vec<CacheResult<bool>> = joined
            .into_iter()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(err) => Err(CacheError::Engine(err.to_string())),
            })
            .collect();

        self.judge_write(results, replicas.len())
    }

    fn judge_write(
        &self,
        results: Vec<CacheResult<bool>>,
        replica_count: usize,
    ) -> CacheResult<bool> {
        let required = self.config.write_concern.required(replica_count);
        let successes = results
            .iter()
            .filter(|result| matches!(result, Ok(true)))
            .count();

        let mut first_error = None;
        let mut any_ok = false;
        for result in results {
            match result {
                Ok(_) => any_ok = true,
                Err(err) => {
                    warn!(error = %err, "replica write failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if successes >= required {
            return Ok(true);
        }
        if any_ok {
            // No replica errored hard enough to matter, the write just did
            // not apply (for example a delete of an absent key).
            return Ok(false);
        }
        Err(first_error.unwrap_or_else(|| CacheError::Engine("no replica results".to_string())))
    }

    /// Dispatches a read to every replica and returns the first completion,
    /// including a miss. Stragglers keep running and are discarded.
    async fn read_race<T, F>(&self, key: &str, call: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: Fn(&dyn CacheEngine) -> CacheResult<T> + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let replicas = self.replication_nodes(key);
        if replicas.is_empty() {
            return Err(CacheError::RingEmpty);
        }

        let call = Arc::new(call);
        let mut in_flight = FuturesUnordered::new();
        for node in &replicas {
            let engine = match self.engine_for(&node.id) {
                Some(engine) => engine,
                None => continue,
            };
            let call = Arc::clone(&call);
            let permits = Arc::clone(&self.dispatch_permits);
            in_flight.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| CacheError::Engine("dispatch pool closed".to_string()))?;
                call(engine.as_ref())
            }));
        }
        if in_flight.is_empty() {
            return Err(CacheError::Engine("no replica engines".to_string()));
        }

        let first = timeout(self.config.op_timeout, in_flight.next())
            .await
            .map_err(|_| CacheError::Timeout)?;
        match first {
            Some(Ok(result)) => result,
            Some(Err(err)) => Err(CacheError::Engine(err.to_string())),
            None => Err(CacheError::Engine("no replica results".to_string())),
        }
    }
}
