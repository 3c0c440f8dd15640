//! Gateway error taxonomy.
//!
//! Every error carries a stable UUID captured at the point it was first raised and a layer
//! tag (`Domain`, `Repository`, `Route`) naming where it originated. Wrapping an error at a
//! higher layer preserves the original UUID so a caller can correlate a route-level failure
//! back to the domain error that caused it.

use thiserror::Error;
use uuid::Uuid;

/// Coarse-grained error kind, used to pick an HTTP status and to branch on in callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    DeadlineExceeded,
    Cancelled,
    External,
    DatabaseError,
    NotImplemented,
    Unknown,
}

impl ErrorKind {
    /// HTTP status code this kind maps to on the route surface.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Cancelled => 499,
            Self::DatabaseError | Self::Unknown => 500,
            Self::NotImplemented => 501,
            Self::External => 502,
            Self::DeadlineExceeded => 504,
        }
    }

    /// Short machine-readable code, used as the SSE `response.error` `code` field.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::External => "external",
            Self::DatabaseError => "database_error",
            Self::NotImplemented => "not_implemented",
            Self::Unknown => "unknown",
        }
    }
}

/// Layer an error originated in. Preserved through wrapping so the first layer to see the
/// failure stays visible even after a higher layer adds context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Domain,
    Repository,
    Route,
}

/// The gateway's single error type. Domain services, repositories, and routes all return
/// this; they differ only in which `Layer` and `ErrorKind` they construct.
#[derive(Debug, Error)]
#[error("{kind:?} error in {layer:?} ({id}): {message}")]
pub struct GatewayError {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub layer: Layer,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, layer: Layer, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            layer,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Wraps this error for a higher layer, keeping the original id and kind but updating
    /// the layer and adding context to the message. The original error becomes the source.
    pub fn wrap(self, layer: Layer, context: impl Into<String>) -> Self {
        let id = self.id;
        let kind = self.kind;
        let message = format!("{}: {}", context.into(), self.message);
        Self {
            id,
            kind,
            layer,
            message,
            source: Some(Box::new(self)),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, Layer::Domain, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, Layer::Domain, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, Layer::Domain, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, Layer::Domain, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, Layer::Domain, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, Layer::Domain, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, Layer::Domain, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseError, Layer::Repository, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, Layer::Domain, message)
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_maps_to_400() {
        let err = GatewayError::validation("model is required");
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.kind.code(), "validation");
    }

    #[test]
    fn wrap_preserves_original_id_and_kind() {
        let original = GatewayError::not_found("response resp_1 not found");
        let original_id = original.id;
        let wrapped = original.wrap(Layer::Route, "GET /v1/responses/resp_1");
        assert_eq!(wrapped.id, original_id);
        assert_eq!(wrapped.kind, ErrorKind::NotFound);
        assert_eq!(wrapped.layer, Layer::Route);
        assert!(wrapped.message.contains("GET /v1/responses/resp_1"));
        assert!(wrapped.message.contains("response resp_1 not found"));
    }

    #[test]
    fn wrap_sets_source_for_chaining() {
        use std::error::Error as _;
        let original = GatewayError::external("upstream returned 502");
        let wrapped = original.wrap(Layer::Domain, "complete() failed");
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn deadline_exceeded_maps_to_504() {
        assert_eq!(
            GatewayError::deadline_exceeded("stream timeout").http_status(),
            504
        );
    }
}
