//! Shared helpers for cws-api integration tests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use cws_api::{create_app, AppState};
use cws_cluster::mock::MockCluster;
use cws_orchestrator::test_utils::mock_orchestrator;
use std::sync::Arc;
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";
pub const SERVICE_ID: &str = "workspace-service";

/// App over an auto-ready in-memory cluster.
pub fn test_app() -> (Router, Arc<MockCluster>) {
    test_app_with(MockCluster::with_auto_ready())
}

pub fn test_app_with(cluster: MockCluster) -> (Router, Arc<MockCluster>) {
    let (orchestrator, cluster) = mock_orchestrator(cluster);
    (create_app(AppState::new(orchestrator, API_KEY)), cluster)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY)
        .header("x-service-id", SERVICE_ID)
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, authed("GET", uri).body(Body::empty()).unwrap()).await
}

pub async fn post_empty(app: &Router, uri: &str) -> Response<Body> {
    send(app, authed("POST", uri).body(Body::empty()).unwrap()).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, authed("DELETE", uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = authed("POST", uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub fn create_body(id: &str) -> serde_json::Value {
    serde_json::json!({
        "workspaceId": id,
        "template": "node",
        "language": "javascript",
        "libraries": ["express"]
    })
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}
