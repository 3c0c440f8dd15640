//! Authentication extraction.
//!
//! The route table only needs a user id per request; how that id is established is left to an
//! [`AuthContext`] implementation the binary supplies via [`AppState`](crate::app::AppState). The
//! [`DevBearerAuth`] implementation shipped here trusts the bearer token verbatim as the user id
//! and exists only for local development and tests — it performs no verification whatsoever.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;

use gateway_core::GatewayError;

use crate::app::AppState;
use crate::error_response::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Produces a [`UserId`] from request headers. Implementations may verify a signature, call an
/// identity provider, or (as `DevBearerAuth` does) simply trust the caller.
#[async_trait]
pub trait AuthContext: Send + Sync {
    async fn authenticate(&self, parts: &Parts) -> Result<UserId, GatewayError>;
}

/// Development-only: trusts `Authorization: Bearer <user-id>` verbatim as the user id. Never
/// wire this into a deployment that faces untrusted callers.
pub struct DevBearerAuth;

#[async_trait]
impl AuthContext for DevBearerAuth {
    async fn authenticate(&self, parts: &Parts) -> Result<UserId, GatewayError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| GatewayError::forbidden("missing Authorization header"))?;
        let value = header
            .to_str()
            .map_err(|_| GatewayError::forbidden("Authorization header is not valid UTF-8"))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| GatewayError::forbidden("Authorization header must be a Bearer token"))?
            .trim();
        if token.is_empty() {
            return Err(GatewayError::forbidden("bearer token must not be empty"));
        }
        Ok(UserId(token.to_string()))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        state.auth.authenticate(parts).await.map_err(ApiError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/v1/responses");
        if let Some(value) = value {
            builder = builder.header(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn dev_bearer_auth_extracts_token_as_user_id() {
        let parts = parts_with_auth(Some("Bearer user_42"));
        let user = DevBearerAuth.authenticate(&parts).await.unwrap();
        assert_eq!(user.as_str(), "user_42");
    }

    #[tokio::test]
    async fn dev_bearer_auth_rejects_missing_header() {
        let parts = parts_with_auth(None);
        let err = DevBearerAuth.authenticate(&parts).await.unwrap_err();
        assert_eq!(err.kind, gateway_core::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn dev_bearer_auth_rejects_non_bearer_scheme() {
        let parts = parts_with_auth(Some("Basic dXNlcg=="));
        let err = DevBearerAuth.authenticate(&parts).await.unwrap_err();
        assert_eq!(err.kind, gateway_core::ErrorKind::Forbidden);
    }
}
