//! End-to-end exercise of the non-streaming response-create path against the stub upstream,
//! plus the 404s that unknown ids produce across the response/plan/artifact sub-resources.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri).header("Authorization", "Bearer test-token")
}

#[tokio::test]
async fn create_response_non_streaming_round_trips_through_stub_upstream() {
    let app = common::test_router();
    let body = json!({
        "model": "gpt-test",
        "input": "hello there",
    });
    let response = app
        .oneshot(
            authed("POST", "/v1/responses")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let dto: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(dto["status"], "completed");
    assert!(dto["id"].as_str().is_some());
}

#[tokio::test]
async fn create_response_rejects_unsupported_input_shape() {
    let app = common::test_router();
    let body = json!({
        "model": "gpt-test",
        "input": 42,
    });
    let response = app
        .oneshot(
            authed("POST", "/v1/responses")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_unknown_response_is_not_found() {
    let app = common::test_router();
    let response = app
        .oneshot(authed("GET", "/v1/responses/resp_does_not_exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plan_for_unknown_response_is_not_found() {
    let app = common::test_router();
    let response = app
        .oneshot(authed("GET", "/v1/responses/resp_does_not_exist/plan").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_artifact_is_not_found() {
    let app = common::test_router();
    let response = app
        .oneshot(authed("GET", "/v1/artifacts/artifact_does_not_exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
