//! Artifact storage: create, version (with lineage and `IsLatest` demotion), list, and purge.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Slides,
    Document,
    Code,
    Data,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Ephemeral,
    Session,
    Permanent,
}

/// Exactly one of these is populated per artifact — enforced at construction, not by the
/// type system, since both sides round-trip through the same storage row.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Content(String),
    StoragePath(String),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub public_id: String,
    pub response_id: String,
    pub plan_id: Option<String>,
    pub content_type: ContentType,
    pub mime_type: String,
    pub title: String,
    pub source: ArtifactSource,
    pub size_bytes: u64,
    pub version: u32,
    pub parent_id: Option<u64>,
    pub is_latest: bool,
    pub retention_policy: RetentionPolicy,
    pub metadata: Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewArtifact {
    pub response_id: String,
    pub plan_id: Option<String>,
    pub content_type: ContentType,
    pub mime_type: String,
    pub title: String,
    pub source: ArtifactSource,
    pub retention_policy: RetentionPolicy,
    pub metadata: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fields a caller may change when creating a new version; unset fields carry over from the
/// parent artifact.
#[derive(Clone, Debug, Default)]
pub struct VersionUpdate {
    pub title: Option<String>,
    pub source: Option<ArtifactSource>,
    pub mime_type: Option<String>,
    pub metadata: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ArtifactFilter<'a> {
    pub response_id: Option<&'a str>,
    pub plan_id: Option<&'a str>,
    pub content_type: Option<ContentType>,
    pub is_latest: Option<bool>,
    pub retention_policy: Option<RetentionPolicy>,
    pub exclude_expired: bool,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

fn source_size(source: &ArtifactSource) -> u64 {
    match source {
        ArtifactSource::Content(s) => s.len() as u64,
        ArtifactSource::StoragePath(_) => 0,
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn create(&self, new_artifact: NewArtifact) -> Result<Artifact, GatewayError>;

    async fn get(&self, public_id: &str) -> Result<Artifact, GatewayError>;

    /// Resolves the lineage root via the parent chain, creates a new version attached to
    /// that root, and demotes every other entry in the lineage to `is_latest = false`.
    async fn create_version(
        &self,
        parent_public_id: &str,
        update: VersionUpdate,
    ) -> Result<Artifact, GatewayError>;

    async fn list(&self, filter: ArtifactFilter<'_>) -> Result<Vec<Artifact>, GatewayError>;

    async fn latest_for_response(&self, response_id: &str) -> Result<Vec<Artifact>, GatewayError>;

    async fn purge_expired(&self) -> Result<usize, GatewayError>;

    async fn delete(&self, public_id: &str) -> Result<(), GatewayError>;
}

struct Inner {
    artifacts: HashMap<u64, Artifact>,
    by_public_id: HashMap<String, u64>,
    next_id: u64,
}

pub struct InMemoryArtifactStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                artifacts: HashMap::new(),
                by_public_id: HashMap::new(),
                next_id: 1,
            })),
        }
    }
}

/// Walks parent pointers to the lineage root (the artifact whose own `parent_id` is `None`).
fn resolve_root(inner: &Inner, mut id: u64) -> u64 {
    while let Some(parent_id) = inner.artifacts.get(&id).and_then(|a| a.parent_id) {
        id = parent_id;
    }
    id
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn create(&self, new_artifact: NewArtifact) -> Result<Artifact, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let public_id = format!("artifact_{}", Uuid::new_v4());
        let artifact = Artifact {
            id,
            public_id: public_id.clone(),
            response_id: new_artifact.response_id,
            plan_id: new_artifact.plan_id,
            content_type: new_artifact.content_type,
            mime_type: new_artifact.mime_type,
            title: new_artifact.title,
            size_bytes: source_size(&new_artifact.source),
            source: new_artifact.source,
            version: 1,
            parent_id: None,
            is_latest: true,
            retention_policy: new_artifact.retention_policy,
            metadata: new_artifact.metadata,
            expires_at: new_artifact.expires_at,
            created_at: Utc::now(),
        };
        inner.artifacts.insert(id, artifact.clone());
        inner.by_public_id.insert(public_id, id);
        Ok(artifact)
    }

    async fn get(&self, public_id: &str) -> Result<Artifact, GatewayError> {
        let inner = self.inner.read().await;
        let id = inner
            .by_public_id
            .get(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("artifact {} not found", public_id)))?;
        Ok(inner.artifacts.get(id).expect("id from index").clone())
    }

    async fn create_version(
        &self,
        parent_public_id: &str,
        update: VersionUpdate,
    ) -> Result<Artifact, GatewayError> {
        let mut inner = self.inner.write().await;
        let parent_id = *inner
            .by_public_id
            .get(parent_public_id)
            .ok_or_else(|| GatewayError::not_found(format!("artifact {} not found", parent_public_id)))?;
        let parent = inner.artifacts.get(&parent_id).expect("id from index").clone();
        let root_id = resolve_root(&inner, parent_id);

        let id = inner.next_id;
        inner.next_id += 1;
        let public_id = format!("artifact_{}", Uuid::new_v4());
        let source = update.source.unwrap_or(parent.source);
        let new_version = Artifact {
            id,
            public_id: public_id.clone(),
            response_id: parent.response_id,
            plan_id: parent.plan_id,
            content_type: parent.content_type,
            mime_type: update.mime_type.unwrap_or(parent.mime_type),
            title: update.title.unwrap_or(parent.title),
            size_bytes: source_size(&source),
            source,
            version: parent.version + 1,
            parent_id: Some(root_id),
            is_latest: true,
            retention_policy: parent.retention_policy,
            metadata: update.metadata.unwrap_or(parent.metadata),
            expires_at: update.expires_at.or(parent.expires_at),
            created_at: Utc::now(),
        };
        inner.artifacts.insert(id, new_version.clone());
        inner.by_public_id.insert(public_id, id);

        // markOldVersionsNotLatest: flip every other member of the lineage to not-latest.
        let lineage_ids: Vec<u64> = inner
            .artifacts
            .values()
            .filter(|a| a.id == root_id || a.parent_id == Some(root_id))
            .map(|a| a.id)
            .collect();
        for lineage_id in lineage_ids {
            if lineage_id != id {
                if let Some(a) = inner.artifacts.get_mut(&lineage_id) {
                    a.is_latest = false;
                }
            }
        }

        Ok(new_version)
    }

    async fn list(&self, filter: ArtifactFilter<'_>) -> Result<Vec<Artifact>, GatewayError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Artifact> = inner
            .artifacts
            .values()
            .filter(|a| filter.response_id.is_none_or(|r| a.response_id == r))
            .filter(|a| filter.plan_id.is_none_or(|p| a.plan_id.as_deref() == Some(p)))
            .filter(|a| filter.content_type.is_none_or(|ct| a.content_type == ct))
            .filter(|a| filter.is_latest.is_none_or(|l| a.is_latest == l))
            .filter(|a| filter.retention_policy.is_none_or(|rp| a.retention_policy == rp))
            .filter(|a| !filter.exclude_expired || !a.expires_at.is_some_and(|exp| exp < Utc::now()))
            .filter(|a| filter.created_after.is_none_or(|after| a.created_at > after))
            .filter(|a| filter.created_before.is_none_or(|before| a.created_at < before))
            .cloned()
            .collect();
        items.sort_by_key(|a| a.id);
        if filter.offset > 0 {
            items = items.into_iter().skip(filter.offset).collect();
        }
        if filter.limit > 0 {
            items.truncate(filter.limit);
        }
        Ok(items)
    }

    async fn latest_for_response(&self, response_id: &str) -> Result<Vec<Artifact>, GatewayError> {
        self.list(ArtifactFilter {
            response_id: Some(response_id),
            is_latest: Some(true),
            limit: 0,
            offset: 0,
            ..Default::default()
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize, GatewayError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let expired: Vec<u64> = inner
            .artifacts
            .values()
            .filter(|a| a.expires_at.is_some_and(|exp| exp < now))
            .map(|a| a.id)
            .collect();
        for id in &expired {
            if let Some(a) = inner.artifacts.remove(id) {
                inner.by_public_id.remove(&a.public_id);
            }
        }
        Ok(expired.len())
    }

    async fn delete(&self, public_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        let id = inner
            .by_public_id
            .remove(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("artifact {} not found", public_id)))?;
        inner.artifacts.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(response_id: &str) -> NewArtifact {
        NewArtifact {
            response_id: response_id.to_string(),
            plan_id: None,
            content_type: ContentType::Document,
            mime_type: "text/markdown".into(),
            title: "Report".into(),
            source: ArtifactSource::Content("v1".into()),
            retention_policy: RetentionPolicy::Session,
            metadata: Value::Null,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_starts_at_version_one_and_latest() {
        let store = InMemoryArtifactStore::new();
        let a = store.create(sample("resp_1")).await.unwrap();
        assert_eq!(a.version, 1);
        assert!(a.is_latest);
        assert!(a.parent_id.is_none());
    }

    #[tokio::test]
    async fn create_version_demotes_entire_lineage() {
        let store = InMemoryArtifactStore::new();
        let v1 = store.create(sample("resp_1")).await.unwrap();
        let v2 = store
            .create_version(
                &v1.public_id,
                VersionUpdate {
                    source: Some(ArtifactSource::Content("v2".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let v3 = store
            .create_version(
                &v2.public_id,
                VersionUpdate {
                    source: Some(ArtifactSource::Content("v3".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(v3.version, 3);
        assert_eq!(v3.parent_id, Some(store.get(&v1.public_id).await.unwrap().id));

        let v1_reloaded = store.get(&v1.public_id).await.unwrap();
        let v2_reloaded = store.get(&v2.public_id).await.unwrap();
        assert!(!v1_reloaded.is_latest);
        assert!(!v2_reloaded.is_latest);
        assert!(v3.is_latest);

        let latest = store.latest_for_response("resp_1").await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, v3.id);
    }

    #[tokio::test]
    async fn purge_expired_is_idempotent() {
        let store = InMemoryArtifactStore::new();
        let mut new_artifact = sample("resp_1");
        new_artifact.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.create(new_artifact).await.unwrap();

        let purged_first = store.purge_expired().await.unwrap();
        assert_eq!(purged_first, 1);
        let purged_second = store.purge_expired().await.unwrap();
        assert_eq!(purged_second, 0);
    }

    #[tokio::test]
    async fn delete_removes_artifact() {
        let store = InMemoryArtifactStore::new();
        let a = store.create(sample("resp_1")).await.unwrap();
        store.delete(&a.public_id).await.unwrap();
        let err = store.get(&a.public_id).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_filters_by_content_type_and_pagination() {
        let store = InMemoryArtifactStore::new();
        for _ in 0..3 {
            store.create(sample("resp_1")).await.unwrap();
        }
        let mut code_artifact = sample("resp_1");
        code_artifact.content_type = ContentType::Code;
        store.create(code_artifact).await.unwrap();

        let docs = store
            .list(ArtifactFilter {
                response_id: Some("resp_1"),
                content_type: Some(ContentType::Document),
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|a| a.content_type == ContentType::Document));
    }
}
