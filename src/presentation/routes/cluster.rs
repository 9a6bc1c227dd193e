//! Cluster membership, election and reporting endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    core::{
        cluster::{ElectionAlgorithm, ElectionOutcome},
        orchestrator::{Analytics, FailoverReport, MembershipChange, NodeSpec, Snapshot},
    },
    error::Result,
    AppState,
};

pub fn cluster_router() -> Router<AppState> {
    Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/analytics", get(get_analytics))
        .route("/nodes", post(add_node))
        .route("/nodes/:node_id", delete(remove_node))
        .route("/nodes/:node_id/heartbeat", post(heartbeat))
        .route("/election", post(elect_leader))
        .route("/failover", post(failover))
}

#[derive(Debug, Default, Deserialize)]
struct ElectionRequest {
    algorithm: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.orchestrator.snapshot().await;
    Json(json!({
        "status": "ok",
        "node_id": snapshot.node_id,
        "leader": snapshot.leader,
        "uptime": snapshot.uptime,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.orchestrator.snapshot().await)
}

async fn get_analytics(State(state): State<AppState>) -> Json<Analytics> {
    Json(state.orchestrator.analytics().await)
}

async fn add_node(
    State(state): State<AppState>,
    Json(spec): Json<NodeSpec>,
) -> (StatusCode, Json<MembershipChange>) {
    (StatusCode::CREATED, Json(state.orchestrator.add_node(spec).await))
}

async fn remove_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<MembershipChange>> {
    Ok(Json(state.orchestrator.remove_node(&node_id).await?))
}

async fn heartbeat(State(state): State<AppState>, Path(node_id): Path<String>) -> Result<StatusCode> {
    state.orchestrator.heartbeat(&node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn elect_leader(
    State(state): State<AppState>,
    body: Option<Json<ElectionRequest>>,
) -> Result<Json<ElectionOutcome>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let algorithm = match request.algorithm {
        Some(name) => name.parse::<ElectionAlgorithm>()?,
        None => ElectionAlgorithm::Bully,
    };
    Ok(Json(state.orchestrator.elect_leader(algorithm).await))
}

async fn failover(State(state): State<AppState>) -> Json<FailoverReport> {
    Json(state.orchestrator.failover().await)
}
