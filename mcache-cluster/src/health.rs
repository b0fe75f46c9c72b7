//! # Health Monitor
//!
//! Defensive liveness checks, independent of the primary heartbeat channel.
//! Every node known to service discovery is probed in parallel under a
//! global deadline; each result drives a per-node state machine that emits
//! an event whenever the status changes.
//!
//! The cadence is deliberately loose (the default is one minute): this is a
//! cross-check on the heartbeat signal, not a replacement for it.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant, SystemTime};

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use mcache_common::NodeStatus;

use crate::discovery::{NodeRecord, ServiceDiscovery};

/// Monitor tunables.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between defensive sweeps.
    pub check_interval: Duration,
    /// Socket connect timeout per node.
    pub probe_timeout: Duration,
    /// Deadline for one whole sweep.
    pub global_deadline: Duration,
    /// Heartbeat age past which a node counts as stale, where the discovery
    /// backend supplies heartbeats at all.
    pub stale_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(2),
            global_deadline: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(90),
        }
    }
}

/// Result of probing one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    /// Discovery no longer knows the node.
    NotFound,
    /// Heartbeat older than the stale threshold.
    Stale,
    /// Socket connect failed or timed out.
    Unreachable,
    /// Reachable but the cache ping failed.
    Degraded,
}

impl CheckOutcome {
    fn status(&self) -> NodeStatus {
        match self {
            CheckOutcome::Healthy => NodeStatus::Healthy,
            CheckOutcome::NotFound => NodeStatus::Unknown,
            CheckOutcome::Stale => NodeStatus::Stale,
            CheckOutcome::Unreachable => NodeStatus::Unreachable,
            CheckOutcome::Degraded => NodeStatus::Degraded,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Healthy => "HEALTHY",
            CheckOutcome::NotFound => "NOT_FOUND",
            CheckOutcome::Stale => "STALE",
            CheckOutcome::Unreachable => "UNREACHABLE",
            CheckOutcome::Degraded => "DEGRADED",
        }
    }
}

/// Per-node check history.
#[derive(Debug, Clone)]
pub struct NodeHealthState {
    pub node_id: String,
    pub current_status: NodeStatus,
    pub previous_status: NodeStatus,
    /// Consecutive non-healthy results; reset on HEALTHY.
    pub failure_count: u32,
    pub last_check: Option<SystemTime>,
    pub last_result: Option<&'static str>,
    pub last_response_time: Option<Duration>,
}

impl NodeHealthState {
    fn new(node_id: &str) -> Self {
        NodeHealthState {
            node_id: node_id.to_string(),
            current_status: NodeStatus::Unknown,
            previous_status: NodeStatus::Unknown,
            failure_count: 0,
            last_check: None,
            last_result: None,
            last_response_time: None,
        }
    }

    /// True when the most recent check changed the status.
    pub fn has_health_changed(&self) -> bool {
        self.current_status != self.previous_status
    }
}

/// Emitted on every status transition.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
    /// Transitions into UNREACHABLE are classified critical.
    pub critical: bool,
}

/// Sweep totals, for the HTTP summary endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Optional application-level probe on top of the socket check.
pub trait CachePinger: Send + Sync {
    fn ping(&self, node_id: &str) -> bool;
}

/// Handle for the periodic check driver.
pub struct MonitorHandle {
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Defensive per-node liveness checker.
pub struct HealthMonitor {
    discovery: Arc<dyn ServiceDiscovery>,
    pinger: Option<Arc<dyn CachePinger>>,
    config: HealthConfig,
    states: Mutex<HashMap<String, NodeHealthState>>,
    events: broadcast::Sender<HealthEvent>,
    shutdown: AtomicBool,
}

impl HealthMonitor {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, config: HealthConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        HealthMonitor {
            discovery,
            pinger: None,
            config,
            states: Mutex::new(HashMap::new()),
            events,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn CachePinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }

    /// Subscribes to status-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Probes every known node in parallel under the global deadline.
    /// Returns the number of nodes whose results were applied.
    pub async fn perform_defensive_check(&self) -> usize {
        if self.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        let records = self.discovery.all_nodes();
        if records.is_empty() {
            return 0;
        }

        let deadline = Instant::now() + self.config.global_deadline;
        let mut probes = FuturesUnordered::new();
        for record in records {
            let config = self.config.clone();
            let pinger = self.pinger.clone();
            probes.push(tokio::spawn(async move {
                let outcome = probe_node(&record, &config, pinger.as_deref()).await;
                (record.node_id, outcome)
            }));
        }

        let mut applied = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, probes.next()).await {
                Ok(Some(Ok((node_id, outcome)))) => {
                    self.apply_outcome(&node_id, outcome.0, outcome.1);
                    applied += 1;
                }
                Ok(Some(Err(err))) => {
                    warn!(error = %err, "health probe task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("defensive check hit the global deadline");
                    break;
                }
            }
        }
        applied
    }

    /// Probes a single node by id, for the on-demand HTTP check. Absent when
    /// discovery does not know the id at all and never has.
    pub async fn check_node(&self, node_id: &str) -> NodeStatus {
        let outcome = match self.discovery.find(node_id) {
            Some(record) => {
                probe_node(&record, &self.config, self.pinger.as_deref()).await
            }
            None => (CheckOutcome::NotFound, None),
        };
        self.apply_outcome(node_id, outcome.0, outcome.1);
        outcome.0.status()
    }

    fn apply_outcome(
        &self,
        node_id: &str,
        outcome: CheckOutcome,
        response_time: Option<Duration>,
    ) {
        let status = outcome.status();
        let event = {
            let mut states = self.states.lock();
            let state = states
                .entry(node_id.to_string())
                .or_insert_with(|| NodeHealthState::new(node_id));

            state.previous_status = state.current_status;
            state.current_status = status;
            state.last_check = Some(SystemTime::now());
            state.last_result = Some(outcome.label());
            state.last_response_time = response_time;
            if status.is_healthy() {
                state.failure_count = 0;
            } else {
                state.failure_count += 1;
            }

            if state.has_health_changed() {
                Some(HealthEvent {
                    node_id: node_id.to_string(),
                    from: state.previous_status,
                    to: state.current_status,
                    critical: matches!(status, NodeStatus::Unreachable),
                })
            } else {
                None
            }
        };

        if let Some(event) = event {
            if event.critical {
                warn!(node = %event.node_id, from = %event.from, to = %event.to, "critical health transition");
            } else {
                info!(node = %event.node_id, from = %event.from, to = %event.to, "health transition");
            }
            let _ = self.events.send(event);
        } else {
            debug!(node = %node_id, status = %status, "health check unchanged");
        }
    }

    /// Starts the periodic driver. The handle must be stopped on shutdown.
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let monitor = Arc::clone(self);
        let interval = self.config.check_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if monitor.shutdown.load(Ordering::Acquire) {
                    break;
                }
                monitor.perform_defensive_check().await;
            }
        });
        MonitorHandle { task }
    }

    /// Stops future sweeps; in-flight probes finish on their own.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeHealthState> {
        self.states.lock().get(node_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<NodeHealthState> {
        let mut states: Vec<NodeHealthState> = self.states.lock().values().cloned().collect();
        states.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        states
    }

    pub fn healthy_nodes(&self) -> Vec<NodeHealthState> {
        self.snapshot()
            .into_iter()
            .filter(|state| state.current_status.is_healthy())
            .collect()
    }

    pub fn unhealthy_nodes(&self) -> Vec<NodeHealthState> {
        self.snapshot()
            .into_iter()
            .filter(|state| !state.current_status.is_healthy())
            .collect()
    }

    pub fn summary(&self) -> HealthSummary {
        let states = self.snapshot();
        let healthy = states
            .iter()
            .filter(|state| state.current_status.is_healthy())
            .count();
        HealthSummary {
            total: states.len(),
            healthy,
            unhealthy: states.len() - healthy,
        }
    }
}

/// Runs the per-node check ladder: staleness, socket connect, cache ping.
async fn probe_node(
    record: &NodeRecord,
    config: &HealthConfig,
    pinger: Option<&dyn CachePinger>,
) -> (CheckOutcome, Option<Duration>) {
    if let Some(heartbeat) = record.last_heartbeat {
        let age = SystemTime::now()
            .duration_since(heartbeat)
            .unwrap_or(Duration::ZERO);
        if age > config.stale_threshold {
            return (CheckOutcome::Stale, None);
        }
    }

    let started = Instant::now();
    match timeout(config.probe_timeout, TcpStream::connect(record.addr())).await {
        Ok(Ok(_stream)) => {}
        Ok(Err(_)) | Err(_) => return (CheckOutcome::Unreachable, None),
    }
    let response_time = started.elapsed();

    if let Some(pinger) = pinger {
        if !pinger.ping(&record.node_id) {
            return (CheckOutcome::Degraded, Some(response_time));
        }
    }
    (CheckOutcome::Healthy, Some(response_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use std::net::TcpListener;

    fn quick_config() -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_millis(500),
            global_deadline: Duration::from_secs(5),
            stale_threshold: Duration::from_millis(100),
        }
    }

    fn monitor_for(discovery: StaticDiscovery) -> HealthMonitor {
        HealthMonitor::new(Arc::new(discovery), quick_config())
    }

    #[tokio::test]
    async fn healthy_node_is_reported_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let discovery = StaticDiscovery::new();
        discovery.register(NodeRecord::new("n1", "127.0.0.1", port));
        let monitor = monitor_for(discovery);

        assert_eq!(monitor.perform_defensive_check().await, 1);
        let state = monitor.state_of("n1").unwrap();
        assert_eq!(state.current_status, NodeStatus::Healthy);
        assert_eq!(state.failure_count, 0);
        assert!(state.last_response_time.is_some());
    }

    #[tokio::test]
    async fn closed_port_transitions_to_unreachable_and_back() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let discovery = StaticDiscovery::new();
        discovery.register(NodeRecord::new("n1", "127.0.0.1", addr.port()));
        let monitor = monitor_for(discovery);

        monitor.perform_defensive_check().await;
        assert_eq!(
            monitor.state_of("n1").unwrap().current_status,
            NodeStatus::Healthy
        );

        drop(listener);
        monitor.perform_defensive_check().await;
        let state = monitor.state_of("n1").unwrap();
        assert_eq!(state.current_status, NodeStatus::Unreachable);
        assert!(state.has_health_changed());
        assert_eq!(state.failure_count, 1);

        let _reopened = TcpListener::bind(addr).unwrap();
        monitor.perform_defensive_check().await;
        let state = monitor.state_of("n1").unwrap();
        assert_eq!(state.current_status, NodeStatus::Healthy);
        assert_eq!(state.failure_count, 0);
    }

    #[tokio::test]
    async fn transition_emits_event() {
        let discovery = StaticDiscovery::new();
        // Reserved port with no listener: connect is refused immediately.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        discovery.register(NodeRecord::new("n1", "127.0.0.1", port));

        let monitor = monitor_for(discovery);
        let mut events = monitor.subscribe();

        monitor.perform_defensive_check().await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.node_id, "n1");
        assert_eq!(event.to, NodeStatus::Unreachable);
        assert!(event.critical);
    }

    #[tokio::test]
    async fn stale_heartbeat_wins_over_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let discovery = StaticDiscovery::new();
        discovery.register(NodeRecord::new("n1", "127.0.0.1", port));
        discovery.record_heartbeat("n1");
        let monitor = monitor_for(discovery);

        // Let the heartbeat age past the (tiny) stale threshold.
        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.perform_defensive_check().await;
        assert_eq!(
            monitor.state_of("n1").unwrap().current_status,
            NodeStatus::Stale
        );
    }

    #[tokio::test]
    async fn no_heartbeat_signal_never_reports_stale() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let discovery = StaticDiscovery::new();
        discovery.register(NodeRecord::new("n1", "127.0.0.1", port));
        let monitor = monitor_for(discovery);

        for _ in 0..3 {
            monitor.perform_defensive_check().await;
            assert_ne!(
                monitor.state_of("n1").unwrap().current_status,
                NodeStatus::Stale
            );
        }
    }

    #[tokio::test]
    async fn unknown_node_check_reports_unknown() {
        let monitor = monitor_for(StaticDiscovery::new());
        let status = monitor.check_node("ghost").await;
        assert_eq!(status, NodeStatus::Unknown);
        assert_eq!(monitor.state_of("ghost").unwrap().failure_count, 1);
    }

    struct FailingPinger;
    impl CachePinger for FailingPinger {
        fn ping(&self, _node_id: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn failed_cache_ping_degrades() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let discovery = StaticDiscovery::new();
        discovery.register(NodeRecord::new("n1", "127.0.0.1", port));
        let monitor = HealthMonitor::new(Arc::new(discovery), quick_config())
            .with_pinger(Arc::new(FailingPinger));

        monitor.perform_defensive_check().await;
        assert_eq!(
            monitor.state_of("n1").unwrap().current_status,
            NodeStatus::Degraded
        );
    }

    #[tokio::test]
    async fn summary_counts() {
        let live = TcpListener::bind("127.0.0.1:0").unwrap();
        let live_port = live.local_addr().unwrap().port();
        let dead = TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let discovery = StaticDiscovery::new();
        discovery.register(NodeRecord::new("up", "127.0.0.1", live_port));
        discovery.register(NodeRecord::new("down", "127.0.0.1", dead_port));
        let monitor = monitor_for(discovery);

        monitor.perform_defensive_check().await;
        let summary = monitor.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
    }
}
