//! Conversations and their branch-scoped items: append, fork, branch-swap, pagination.
//!
//! A `Conversation` owns an ordered, branchable sequence of `Item`s. The `MAIN` branch is the
//! default and is never deletable; other branches may be created standalone or forked from a
//! point in an existing branch. `ConversationStore` is the capability interface services
//! depend on; `InMemoryConversationStore` is the reference implementation, standing in for the
//! out-of-scope database driver per the concurrency model's repository-trait design.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::message::MessagePart;

pub const MAIN_BRANCH: &str = "MAIN";

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    Function,
    Tool,
    Reasoning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRole {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Like,
    Unlike,
    #[default]
    Unset,
}

/// Metadata recorded for a branch: its parent, where it was forked from, and how many items
/// it holds. `item_count` is kept in lockstep with the store's actual per-branch item count.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct BranchMetadata {
    pub parent: Option<String>,
    pub forked_from_item_id: Option<String>,
    pub forked_at: Option<DateTime<Utc>>,
    pub item_count: usize,
    pub description: Option<String>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: u64,
    pub public_id: String,
    pub user_id: String,
    pub active_branch: String,
    pub branch_metadata: HashMap<String, BranchMetadata>,
    pub instruction_version: u32,
    pub effective_instruction_snapshot: Option<String>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Item {
    pub id: u64,
    pub conversation_id: u64,
    pub public_id: String,
    pub branch: String,
    pub sequence_number: u64,
    pub item_type: ItemType,
    pub role: ItemRole,
    pub content: Vec<MessagePart>,
    pub status: ItemStatus,
    pub response_id: Option<String>,
    pub rating: Rating,
    pub call_id: Option<String>,
}

/// Fields a caller supplies when appending a new item; the store assigns `id`, `public_id`,
/// `branch` (defaulting to the conversation's active branch), and `sequence_number`.
#[derive(Clone, Debug)]
pub struct NewItem {
    pub branch: Option<String>,
    pub item_type: ItemType,
    pub role: ItemRole,
    pub content: Vec<MessagePart>,
    pub status: ItemStatus,
    pub response_id: Option<String>,
    pub call_id: Option<String>,
}

impl NewItem {
    pub fn text(role: ItemRole, text: impl Into<String>) -> Self {
        Self {
            branch: None,
            item_type: ItemType::Message,
            role,
            content: vec![MessagePart::Text { text: text.into() }],
            status: ItemStatus::Completed,
            response_id: None,
            call_id: None,
        }
    }
}

/// Cursor-based pagination over a branch's items, ordered by ascending (default) or
/// descending `id`. `after` is an exclusive cursor: only items past it are returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pagination {
    pub limit: usize,
    pub after: Option<u64>,
    pub before: Option<u64>,
    pub descending: bool,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, user_id: &str) -> Result<Conversation, GatewayError>;

    async fn append(&self, conversation_id: u64, item: NewItem) -> Result<Item, GatewayError>;

    async fn bulk_append(
        &self,
        conversation_id: u64,
        items: Vec<NewItem>,
    ) -> Result<Vec<Item>, GatewayError>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Conversation, GatewayError>;

    /// Idempotent lookup for tool-result upsert: unique by `(conversation_id, call_id, type)`.
    async fn get_item_by_call_id(
        &self,
        conversation_id: u64,
        item_type: ItemType,
        call_id: &str,
    ) -> Result<Option<Item>, GatewayError>;

    async fn rate_item(
        &self,
        item_id: u64,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<Item, GatewayError>;

    async fn create_branch(
        &self,
        conversation_id: u64,
        name: &str,
        parent: Option<String>,
    ) -> Result<BranchMetadata, GatewayError>;

    async fn fork_branch(
        &self,
        conversation_id: u64,
        source_branch: &str,
        new_branch: &str,
        from_item_public_id: &str,
        description: Option<String>,
    ) -> Result<BranchMetadata, GatewayError>;

    /// Makes `branch` the conversation's MAIN branch. Returns the backup branch name the
    /// previous MAIN was renamed to, or `None` if there was nothing to back up.
    async fn swap_branch_to_main(
        &self,
        conversation_id: u64,
        branch: &str,
    ) -> Result<Option<String>, GatewayError>;

    async fn list_branch_items(
        &self,
        conversation_id: u64,
        branch: &str,
        pagination: Pagination,
    ) -> Result<Vec<Item>, GatewayError>;

    async fn count_items(&self, conversation_id: u64, branch: &str) -> Result<usize, GatewayError>;

    async fn delete_all_by_user(&self, user_id: &str) -> Result<(), GatewayError>;
}

struct Inner {
    conversations: HashMap<u64, Conversation>,
    by_public_id: HashMap<String, u64>,
    items: HashMap<u64, Item>,
    items_by_conversation: HashMap<u64, Vec<u64>>,
    next_conversation_id: u64,
    next_item_id: u64,
}

/// Reference `ConversationStore`: an `Arc<RwLock<_>>`-guarded in-memory repository. All
/// multi-row invariants (branch swap, fork, bulk append) are applied under a single write-lock
/// acquisition, standing in for a database transaction per the concurrency model (§5).
pub struct InMemoryConversationStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                conversations: HashMap::new(),
                by_public_id: HashMap::new(),
                items: HashMap::new(),
                items_by_conversation: HashMap::new(),
                next_conversation_id: 1,
                next_item_id: 1,
            })),
        }
    }
}

fn append_locked(
    inner: &mut Inner,
    conversation_id: u64,
    branch: String,
    item: NewItem,
) -> Result<Item, GatewayError> {
    let seq = inner
        .items_by_conversation
        .get(&conversation_id)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| inner.items.get(id))
                .filter(|it| it.branch == branch)
                .count() as u64
        })
        .unwrap_or(0);

    let id = inner.next_item_id;
    inner.next_item_id += 1;
    let new_item = Item {
        id,
        conversation_id,
        public_id: format!("item_{}", Uuid::new_v4()),
        branch: branch.clone(),
        sequence_number: seq + 1,
        item_type: item.item_type,
        role: item.role,
        content: item.content,
        status: item.status,
        response_id: item.response_id,
        rating: Rating::Unset,
        call_id: item.call_id,
    };
    inner.items.insert(id, new_item.clone());
    inner
        .items_by_conversation
        .entry(conversation_id)
        .or_default()
        .push(id);

    if let Some(conv) = inner.conversations.get_mut(&conversation_id) {
        let meta = conv.branch_metadata.entry(branch).or_default();
        meta.item_count += 1;
    }

    Ok(new_item)
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, user_id: &str) -> Result<Conversation, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_conversation_id;
        inner.next_conversation_id += 1;
        let public_id = format!("conv_{}", Uuid::new_v4());
        let mut branch_metadata = HashMap::new();
        branch_metadata.insert(MAIN_BRANCH.to_string(), BranchMetadata::default());
        let conversation = Conversation {
            id,
            public_id: public_id.clone(),
            user_id: user_id.to_string(),
            active_branch: MAIN_BRANCH.to_string(),
            branch_metadata,
            instruction_version: 0,
            effective_instruction_snapshot: None,
        };
        inner.conversations.insert(id, conversation.clone());
        inner.by_public_id.insert(public_id, id);
        Ok(conversation)
    }

    async fn append(&self, conversation_id: u64, item: NewItem) -> Result<Item, GatewayError> {
        let mut inner = self.inner.write().await;
        let branch = item
            .branch
            .clone()
            .or_else(|| {
                inner
                    .conversations
                    .get(&conversation_id)
                    .map(|c| c.active_branch.clone())
            })
            .ok_or_else(|| GatewayError::not_found("conversation not found"))?;

        if let Some(call_id) = item.call_id.clone() {
            let existing_id = inner
                .items_by_conversation
                .get(&conversation_id)
                .into_iter()
                .flatten()
                .find(|id| {
                    inner.items.get(id).is_some_and(|it| {
                        it.call_id.as_deref() == Some(call_id.as_str())
                            && it.item_type == item.item_type
                    })
                })
                .copied();
            if let Some(existing_id) = existing_id {
                let updated = {
                    let existing = inner.items.get_mut(&existing_id).expect("just found");
                    existing.content = item.content;
                    existing.status = item.status;
                    existing.clone()
                };
                return Ok(updated);
            }
        }

        append_locked(&mut inner, conversation_id, branch, item)
    }

    async fn bulk_append(
        &self,
        conversation_id: u64,
        items: Vec<NewItem>,
    ) -> Result<Vec<Item>, GatewayError> {
        let mut inner = self.inner.write().await;
        let active_branch = inner
            .conversations
            .get(&conversation_id)
            .map(|c| c.active_branch.clone())
            .ok_or_else(|| GatewayError::not_found("conversation not found"))?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let branch = item.branch.clone().unwrap_or_else(|| active_branch.clone());
            out.push(append_locked(&mut inner, conversation_id, branch, item)?);
        }
        Ok(out)
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Conversation, GatewayError> {
        let inner = self.inner.read().await;
        let id = inner
            .by_public_id
            .get(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("conversation {} not found", public_id)))?;
        inner
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("conversation {} not found", public_id)))
    }

    async fn get_item_by_call_id(
        &self,
        conversation_id: u64,
        item_type: ItemType,
        call_id: &str,
    ) -> Result<Option<Item>, GatewayError> {
        let inner = self.inner.read().await;
        Ok(inner
            .items_by_conversation
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.items.get(id))
            .find(|it| it.item_type == item_type && it.call_id.as_deref() == Some(call_id))
            .cloned())
    }

    async fn rate_item(
        &self,
        item_id: u64,
        rating: Rating,
        _comment: Option<String>,
    ) -> Result<Item, GatewayError> {
        let mut inner = self.inner.write().await;
        let item = inner
            .items
            .get_mut(&item_id)
            .ok_or_else(|| GatewayError::conflict(format!("item {} not found", item_id)))?;
        item.rating = rating;
        Ok(item.clone())
    }

    async fn create_branch(
        &self,
        conversation_id: u64,
        name: &str,
        parent: Option<String>,
    ) -> Result<BranchMetadata, GatewayError> {
        let mut inner = self.inner.write().await;
        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| GatewayError::not_found("conversation not found"))?;
        let meta = BranchMetadata {
            parent,
            ..Default::default()
        };
        conv.branch_metadata.insert(name.to_string(), meta.clone());
        Ok(meta)
    }

    async fn fork_branch(
        &self,
        conversation_id: u64,
        source_branch: &str,
        new_branch: &str,
        from_item_public_id: &str,
        description: Option<String>,
    ) -> Result<BranchMetadata, GatewayError> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(GatewayError::not_found("conversation not found"));
        }

        let source_ids: Vec<u64> = inner
            .items_by_conversation
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|id| {
                inner
                    .items
                    .get(id)
                    .is_some_and(|it| it.branch == source_branch)
            })
            .collect();

        let fork_index = source_ids
            .iter()
            .position(|id| {
                inner
                    .items
                    .get(id)
                    .is_some_and(|it| it.public_id == from_item_public_id)
            })
            .ok_or_else(|| {
                GatewayError::not_found(format!(
                    "fork point {} not found on branch {}",
                    from_item_public_id, source_branch
                ))
            })?;

        let to_copy: Vec<Item> = source_ids[..=fork_index]
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect();

        for (i, source_item) in to_copy.into_iter().enumerate() {
            let id = inner.next_item_id;
            inner.next_item_id += 1;
            let copied = Item {
                id,
                conversation_id,
                public_id: format!("item_{}", Uuid::new_v4()),
                branch: new_branch.to_string(),
                sequence_number: (i + 1) as u64,
                ..source_item
            };
            inner.items.insert(id, copied);
            inner
                .items_by_conversation
                .entry(conversation_id)
                .or_default()
                .push(id);
        }

        let meta = BranchMetadata {
            parent: Some(source_branch.to_string()),
            forked_from_item_id: Some(from_item_public_id.to_string()),
            forked_at: Some(Utc::now()),
            item_count: fork_index + 1,
            description,
        };
        inner
            .conversations
            .get_mut(&conversation_id)
            .expect("checked above")
            .branch_metadata
            .insert(new_branch.to_string(), meta.clone());
        Ok(meta)
    }

    async fn swap_branch_to_main(
        &self,
        conversation_id: u64,
        branch: &str,
    ) -> Result<Option<String>, GatewayError> {
        let mut inner = self.inner.write().await;
        if branch == MAIN_BRANCH {
            return Ok(None);
        }
        if !inner
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.branch_metadata.contains_key(branch))
        {
            return Err(GatewayError::not_found(format!("branch {} not found", branch)));
        }

        let main_has_items = inner
            .items_by_conversation
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .any(|id| {
                inner
                    .items
                    .get(id)
                    .is_some_and(|it| it.branch == MAIN_BRANCH)
            });

        let backup_name = if main_has_items {
            Some(format!("MAIN_{}", Utc::now().format("%Y%m%d%H%M%S")))
        } else {
            None
        };

        if let Some(backup) = &backup_name {
            for id in inner
                .items_by_conversation
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default()
            {
                if let Some(item) = inner.items.get_mut(&id) {
                    if item.branch == MAIN_BRANCH {
                        item.branch = backup.clone();
                    }
                }
            }
            let old_main_meta = inner
                .conversations
                .get_mut(&conversation_id)
                .expect("checked above")
                .branch_metadata
                .remove(MAIN_BRANCH)
                .unwrap_or_default();
            inner
                .conversations
                .get_mut(&conversation_id)
                .expect("checked above")
                .branch_metadata
                .insert(backup.clone(), old_main_meta);
        }

        for id in inner
            .items_by_conversation
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
        {
            if let Some(item) = inner.items.get_mut(&id) {
                if item.branch == branch {
                    item.branch = MAIN_BRANCH.to_string();
                }
            }
        }
        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .expect("checked above");
        if let Some(meta) = conv.branch_metadata.remove(branch) {
            conv.branch_metadata.insert(MAIN_BRANCH.to_string(), meta);
        }
        conv.active_branch = MAIN_BRANCH.to_string();

        Ok(backup_name)
    }

    async fn list_branch_items(
        &self,
        conversation_id: u64,
        branch: &str,
        pagination: Pagination,
    ) -> Result<Vec<Item>, GatewayError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Item> = inner
            .items_by_conversation
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.items.get(id))
            .filter(|it| it.branch == branch)
            .cloned()
            .collect();
        items.sort_by_key(|it| it.id);
        if pagination.descending {
            items.reverse();
        }
        if let Some(after) = pagination.after {
            items.retain(|it| {
                if pagination.descending {
                    it.id < after
                } else {
                    it.id > after
                }
            });
        }
        if let Some(before) = pagination.before {
            items.retain(|it| {
                if pagination.descending {
                    it.id > before
                } else {
                    it.id < before
                }
            });
        }
        if pagination.limit > 0 {
            items.truncate(pagination.limit);
        }
        Ok(items)
    }

    async fn count_items(&self, conversation_id: u64, branch: &str) -> Result<usize, GatewayError> {
        let inner = self.inner.read().await;
        Ok(inner
            .items_by_conversation
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.items.get(id))
            .filter(|it| it.branch == branch)
            .count())
    }

    async fn delete_all_by_user(&self, user_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        let conv_ids: Vec<u64> = inner
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();
        for id in conv_ids {
            if let Some(conv) = inner.conversations.remove(&id) {
                inner.by_public_id.remove(&conv.public_id);
            }
            if let Some(item_ids) = inner.items_by_conversation.remove(&id) {
                for item_id in item_ids {
                    inner.items.remove(&item_id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_dense_sequence_numbers_per_branch() {
        let store = InMemoryConversationStore::new();
        let conv = store.create("user_1").await.unwrap();
        let a = store
            .append(conv.id, NewItem::text(ItemRole::User, "hi"))
            .await
            .unwrap();
        let b = store
            .append(conv.id, NewItem::text(ItemRole::Assistant, "hello"))
            .await
            .unwrap();
        assert_eq!(a.sequence_number, 1);
        assert_eq!(b.sequence_number, 2);
        assert_eq!(store.count_items(conv.id, MAIN_BRANCH).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn call_id_upsert_updates_existing_item() {
        let store = InMemoryConversationStore::new();
        let conv = store.create("user_1").await.unwrap();
        let mut item = NewItem::text(ItemRole::Tool, "running");
        item.item_type = ItemType::Tool;
        item.call_id = Some("call_1".into());
        let first = store.append(conv.id, item.clone()).await.unwrap();

        item.content = vec![MessagePart::Text { text: "done".into() }];
        let second = store.append(conv.id, item).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.count_items(conv.id, MAIN_BRANCH).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fork_branch_copies_prefix_and_records_metadata() {
        let store = InMemoryConversationStore::new();
        let conv = store.create("user_1").await.unwrap();
        let a = store.append(conv.id, NewItem::text(ItemRole::User, "a")).await.unwrap();
        store.append(conv.id, NewItem::text(ItemRole::Assistant, "b")).await.unwrap();
        store.append(conv.id, NewItem::text(ItemRole::User, "c")).await.unwrap();

        let meta = store
            .fork_branch(conv.id, MAIN_BRANCH, "EDIT_1", &a.public_id, Some("edit".into()))
            .await
            .unwrap();
        assert_eq!(meta.item_count, 1);
        assert_eq!(store.count_items(conv.id, "EDIT_1").await.unwrap(), 1);
        assert_eq!(meta.parent.as_deref(), Some(MAIN_BRANCH));
    }

    #[tokio::test]
    async fn swap_branch_to_main_backs_up_existing_main() {
        let store = InMemoryConversationStore::new();
        let conv = store.create("user_1").await.unwrap();
        store.append(conv.id, NewItem::text(ItemRole::User, "a")).await.unwrap();
        store.append(conv.id, NewItem::text(ItemRole::User, "b")).await.unwrap();

        store.create_branch(conv.id, "EDIT_1", Some(MAIN_BRANCH.into())).await.unwrap();
        store
            .append(
                conv.id,
                NewItem {
                    branch: Some("EDIT_1".into()),
                    ..NewItem::text(ItemRole::User, "x")
                },
            )
            .await
            .unwrap();

        let backup = store.swap_branch_to_main(conv.id, "EDIT_1").await.unwrap();
        assert!(backup.is_some());
        let backup = backup.unwrap();
        assert_eq!(store.count_items(conv.id, MAIN_BRANCH).await.unwrap(), 1);
        assert_eq!(store.count_items(conv.id, &backup).await.unwrap(), 2);

        let conv = store.find_by_public_id(&conv.public_id).await.unwrap();
        assert_eq!(conv.active_branch, MAIN_BRANCH);
    }

    #[tokio::test]
    async fn swap_branch_already_main_is_noop() {
        let store = InMemoryConversationStore::new();
        let conv = store.create("user_1").await.unwrap();
        let backup = store.swap_branch_to_main(conv.id, MAIN_BRANCH).await.unwrap();
        assert!(backup.is_none());
    }

    #[tokio::test]
    async fn pagination_after_cursor_is_exclusive() {
        let store = InMemoryConversationStore::new();
        let conv = store.create("user_1").await.unwrap();
        let a = store.append(conv.id, NewItem::text(ItemRole::User, "a")).await.unwrap();
        store.append(conv.id, NewItem::text(ItemRole::User, "b")).await.unwrap();
        store.append(conv.id, NewItem::text(ItemRole::User, "c")).await.unwrap();

        let page = store
            .list_branch_items(
                conv.id,
                MAIN_BRANCH,
                Pagination {
                    limit: 10,
                    after: Some(a.id),
                    before: None,
                    descending: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|it| it.id > a.id));
    }
}
