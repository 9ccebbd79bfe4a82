//! Integration tests for the service-to-service auth middleware.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;

fn request(headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/v1/workspaces");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn valid_credentials_pass() {
    let (app, _cluster) = common::test_app();

    let response = common::send(
        &app,
        request(&[("x-api-key", common::API_KEY), ("x-service-id", "svc")]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_api_key_is_rejected() {
    let (app, cluster) = common::test_app();

    let response = common::send(&app, request(&[("x-service-id", "svc")])).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        common::json_body(response).await,
        json!({ "status": "error", "message": "Invalid API key" })
    );
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn wrong_api_key_is_rejected() {
    let (app, _cluster) = common::test_app();

    for key in ["wrong", "test-api-ke", "test-api-key-and-more", ""] {
        let response = common::send(
            &app,
            request(&[("x-api-key", key), ("x-service-id", "svc")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "key {key:?}");
    }
}

#[tokio::test]
async fn missing_or_blank_service_id_is_rejected() {
    let (app, _cluster) = common::test_app();

    for headers in [
        vec![("x-api-key", common::API_KEY)],
        vec![("x-api-key", common::API_KEY), ("x-service-id", "   ")],
    ] {
        let response = common::send(&app, request(&headers)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            common::json_body(response).await,
            json!({ "status": "error", "message": "Missing service ID" })
        );
    }
}

#[tokio::test]
async fn rejected_create_never_reaches_the_cluster() {
    let (app, cluster) = common::test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/workspaces")
        .header("content-type", "application/json")
        .header("x-api-key", "wrong")
        .header("x-service-id", "svc")
        .body(Body::from(common::create_body("demo-1").to_string()))
        .unwrap();
    let response = common::send(&app, request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(cluster.calls().is_empty());
    assert_eq!(cluster.object_count(), 0);
}
