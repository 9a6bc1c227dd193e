use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::time::Duration;

use crate::{
    core::coordination::{AcquireOutcome, DeadlockReport, ReleaseOutcome},
    error::Result,
    AppState,
};

pub fn lock_router() -> Router<AppState> {
    Router::new()
        .route("/deadlocks", get(detect_deadlock))
        .route("/:resource/acquire", post(acquire))
        .route("/:resource/release", post(release))
}

#[derive(Debug, Deserialize)]
struct AcquireRequest {
    owner: String,
    /// Lease in seconds; the configured default applies when omitted
    ttl: Option<u64>,
    #[serde(default)]
    reentrant: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseRequest {
    owner: String,
}

async fn acquire(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(request): Json<AcquireRequest>,
) -> Json<AcquireOutcome> {
    let ttl = request.ttl.map(Duration::from_secs);
    Json(
        state
            .orchestrator
            .acquire_lock(&resource, &request.owner, ttl, request.reentrant)
            .await,
    )
}

async fn release(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<ReleaseOutcome>> {
    Ok(Json(state.orchestrator.release_lock(&resource, &request.owner).await?))
}

async fn detect_deadlock(State(state): State<AppState>) -> Json<DeadlockReport> {
    Json(state.orchestrator.detect_deadlock().await)
}
