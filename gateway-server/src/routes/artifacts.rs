//! Artifact read/delete routes, plus the response-scoped listing endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use gateway_core::artifact::{ArtifactFilter, ArtifactSource};
use gateway_core::GatewayError;

use crate::app::AppState;
use crate::auth::UserId;
use crate::error_response::ApiError;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/artifacts/:id", get(get_artifact).delete(delete_artifact))
        .route("/v1/artifacts/:id/versions", get(list_versions))
        .route("/v1/artifacts/:id/download", get(download_artifact))
        .route("/v1/responses/:id/artifacts", get(list_for_response))
        .route("/v1/responses/:id/artifacts/latest", get(latest_for_response))
}

#[derive(Deserialize, Default)]
struct ListQuery {
    content_type: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn parse_content_type(s: &str) -> Result<gateway_core::ContentType, GatewayError> {
    use gateway_core::ContentType::*;
    match s {
        "slides" => Ok(Slides),
        "document" => Ok(Document),
        "code" => Ok(Code),
        "data" => Ok(Data),
        other => Err(GatewayError::validation(format!("unknown content_type {}", other))),
    }
}

async fn get_artifact(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<gateway_core::Artifact>, ApiError> {
    Ok(Json(state.artifacts.get(&id).await?))
}

async fn delete_artifact(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.artifacts.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lists every version in `id`'s lineage. The store only ever attaches a version's `parent_id`
/// to the lineage root (never to an intermediate version), so the root is `id` itself when it
/// has no parent, or its own `parent_id` otherwise.
async fn list_versions(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<Vec<gateway_core::Artifact>>, ApiError> {
    let target = state.artifacts.get(&id).await?;
    let root_id = target.parent_id.unwrap_or(target.id);
    let all = state
        .artifacts
        .list(ArtifactFilter {
            response_id: Some(&target.response_id),
            limit: 0,
            offset: 0,
            ..Default::default()
        })
        .await?;
    let lineage: Vec<_> = all
        .into_iter()
        .filter(|a| a.id == root_id || a.parent_id == Some(root_id))
        .collect();
    Ok(Json(lineage))
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = state.artifacts.get(&id).await?;
    match artifact.source {
        ArtifactSource::Content(content) => Ok((
            [(header::CONTENT_TYPE, artifact.mime_type.clone())],
            content,
        )
            .into_response()),
        ArtifactSource::StoragePath(_) => {
            Err(ApiError::from(GatewayError::not_implemented(
                "downloading artifacts stored out-of-band is not supported by this gateway",
            )))
        }
    }
}

async fn list_for_response(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(response_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<gateway_core::Artifact>>, ApiError> {
    let content_type = query.content_type.as_deref().map(parse_content_type).transpose()?;
    let items = state
        .artifacts
        .list(ArtifactFilter {
            response_id: Some(&response_id),
            content_type,
            limit: query.limit.unwrap_or(0),
            offset: query.offset.unwrap_or(0),
            ..Default::default()
        })
        .await?;
    Ok(Json(items))
}

async fn latest_for_response(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(response_id): Path<String>,
) -> Result<Json<Vec<gateway_core::Artifact>>, ApiError> {
    Ok(Json(state.artifacts.latest_for_response(&response_id).await?))
}
