use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    core::messaging::{EnqueueOutcome, NackOutcome},
    error::{CoordinationError, Result},
    AppState,
};

pub fn queue_router() -> Router<AppState> {
    Router::new()
        .route("/:queue/send", post(send_message))
        .route("/:queue/receive", post(receive_message))
        .route("/messages/:message_id/ack", post(ack_message))
        .route("/messages/:message_id/nack", post(nack_message))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    data: Value,
    priority: Option<u32>,
    dedup_id: Option<String>,
}

async fn send_message(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(request): Json<SendRequest>,
) -> (StatusCode, Json<EnqueueOutcome>) {
    let outcome = state
        .orchestrator
        .send_message(&queue, request.data, request.priority, request.dedup_id)
        .await;
    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(outcome))
}

/// 204 when the queue is empty.
async fn receive_message(State(state): State<AppState>, Path(queue): Path<String>) -> Response {
    match state.orchestrator.receive_message(&queue).await {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn ack_message(State(state): State<AppState>, Path(message_id): Path<String>) -> Result<Json<Value>> {
    if state.orchestrator.ack_message(&message_id).await {
        Ok(Json(json!({ "message_id": message_id, "acked": true })))
    } else {
        Err(CoordinationError::MessageNotInFlight(message_id))
    }
}

async fn nack_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<NackOutcome>> {
    Ok(Json(state.orchestrator.nack_message(&message_id).await?))
}
