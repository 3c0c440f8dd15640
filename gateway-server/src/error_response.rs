//! Maps [`GatewayError`] onto the HTTP error body every route returns on failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::GatewayError;

/// Newtype so `?` inside handlers converts a `GatewayError` straight into an axum response.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::warn!(error_id = %err.id, kind = ?err.kind, layer = ?err.layer, "request failed: {}", err.message);
        let body = Json(serde_json::json!({
            "code": err.id.to_string(),
            "error": err.message,
        }));
        (status, body).into_response()
    }
}
