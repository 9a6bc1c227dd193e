pub mod cluster;
pub mod locks;
pub mod queues;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{core::orchestrator::DistributedOrchestrator, AppState};

/// Create the HTTP router over a shared orchestrator
pub fn router(orchestrator: Arc<DistributedOrchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/api/health", get(cluster::health))
        .nest("/api/cluster", cluster::cluster_router())
        .nest("/api/locks", locks::lock_router())
        .nest("/api/queues", queues::queue_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinationConfig;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn create_test_router() -> Router {
        let config = CoordinationConfig {
            node_id: "n0".to_string(),
            ..CoordinationConfig::default()
        };
        router(Arc::new(DistributedOrchestrator::new(config)))
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_router();
        let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["node_id"], "n0");
    }

    #[tokio::test]
    async fn test_remove_unknown_node_is_not_found() {
        let app = create_test_router();
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/cluster/nodes/ghost")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "node_not_found");
    }

    #[tokio::test]
    async fn test_election_endpoint() {
        let app = create_test_router();
        let response = app
            .oneshot(json_request("POST", "/api/cluster/election", r#"{"algorithm":"raft"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["leader"], "n0");
        assert_eq!(body["algorithm"], "raft");
    }

    #[tokio::test]
    async fn test_release_by_non_owner_conflicts() {
        let app = create_test_router();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/locks/db/acquire", r#"{"owner":"a"}"#))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "acquired");

        let response = app
            .oneshot(json_request("POST", "/api/locks/db/release", r#"{"owner":"b"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_receive_from_empty_queue() {
        let app = create_test_router();
        let response = app
            .oneshot(json_request("POST", "/api/queues/jobs/receive", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
