//! Unauthenticated probes: liveness, readiness, auth-scheme discovery, and a metrics stub.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::app::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/health/auth", get(health_auth))
        .route("/metrics", get(metrics))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readyz(State(_state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ready" }))
}

async fn health_auth() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "scheme": "bearer" }))
}

async fn metrics() -> String {
    // Out of scope for the gateway's own domain (see Non-goals): the field is left empty
    // rather than fabricating numbers a metrics scraper would treat as real.
    String::new()
}
