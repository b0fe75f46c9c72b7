//! # Health HTTP Surface
//!
//! JSON endpoints over the health monitor, for operators and load
//! balancers. Node payloads carry `{nodeId, host, port, healthy,
//! lastChecked, status}`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use mcache_cluster::{HealthMonitor, HealthSummary, NodeHealthState, ServiceDiscovery};

#[derive(Clone)]
pub struct HttpState {
    pub monitor: Arc<HealthMonitor>,
    pub discovery: Arc<dyn ServiceDiscovery>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealthPayload {
    node_id: String,
    host: String,
    port: u16,
    healthy: bool,
    /// Milliseconds since the Unix epoch; absent before the first check.
    last_checked: Option<u64>,
    status: String,
}

impl NodeHealthPayload {
    fn build(state: &NodeHealthState, discovery: &dyn ServiceDiscovery) -> Self {
        let record = discovery.find(&state.node_id);
        NodeHealthPayload {
            node_id: state.node_id.clone(),
            host: record
                .as_ref()
                .map(|record| record.host.clone())
                .unwrap_or_default(),
            port: record.as_ref().map(|record| record.port).unwrap_or(0),
            healthy: state.current_status.is_healthy(),
            last_checked: state.last_check.and_then(epoch_millis),
            status: state.current_status.to_string(),
        }
    }
}

fn epoch_millis(at: SystemTime) -> Option<u64> {
    at.duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_millis() as u64)
}

/// Builds the `/health/*` router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health/ping", get(ping))
        .route("/health/nodes", get(all_nodes))
        .route("/health/nodes/:id", get(node_by_id))
        .route("/health/nodes/:id/check", post(check_node))
        .route("/health/healthy", get(healthy_nodes))
        .route("/health/unhealthy", get(unhealthy_nodes))
        .route("/health/summary", get(summary))
        .route("/health/shutdown", post(shutdown))
        .with_state(state)
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn all_nodes(State(state): State<HttpState>) -> Json<Vec<NodeHealthPayload>> {
    let payloads = state
        .monitor
        .snapshot()
        .iter()
        .map(|node| NodeHealthPayload::build(node, state.discovery.as_ref()))
        .collect();
    Json(payloads)
}

async fn node_by_id(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<NodeHealthPayload>, StatusCode> {
    state
        .monitor
        .state_of(&id)
        .map(|node| Json(NodeHealthPayload::build(&node, state.discovery.as_ref())))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn check_node(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<NodeHealthPayload>, StatusCode> {
    state.monitor.check_node(&id).await;
    state
        .monitor
        .state_of(&id)
        .map(|node| Json(NodeHealthPayload::build(&node, state.discovery.as_ref())))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn healthy_nodes(State(state): State<HttpState>) -> Json<Vec<NodeHealthPayload>> {
    let payloads = state
        .monitor
        .healthy_nodes()
        .iter()
        .map(|node| NodeHealthPayload::build(node, state.discovery.as_ref()))
        .collect();
    Json(payloads)
}

async fn unhealthy_nodes(State(state): State<HttpState>) -> Json<Vec<NodeHealthPayload>> {
    let payloads = state
        .monitor
        .unhealthy_nodes()
        .iter()
        .map(|node| NodeHealthPayload::build(node, state.discovery.as_ref()))
        .collect();
    Json(payloads)
}

async fn summary(State(state): State<HttpState>) -> Json<HealthSummary> {
    Json(state.monitor.summary())
}

async fn shutdown(State(state): State<HttpState>) -> Json<Value> {
    state.monitor.shutdown();
    Json(json!({ "status": "shutting-down" }))
}
