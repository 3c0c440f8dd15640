//! `UserId` extraction rejects requests before they reach the response/plan/artifact routes.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

#[tokio::test]
async fn missing_authorization_header_is_forbidden() {
    let app = common::test_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/responses/resp_does_not_exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn non_bearer_scheme_is_forbidden() {
    let app = common::test_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/responses/resp_does_not_exist")
                .header("Authorization", "Basic dXNlcjpwYXNz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn empty_bearer_token_is_forbidden() {
    let app = common::test_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/responses/resp_does_not_exist")
                .header("Authorization", "Bearer ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
