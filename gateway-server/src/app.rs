//! Shared application state and the top-level route table.

use std::sync::Arc;

use axum::Router;
use gateway_config::GatewayConfig;
use gateway_core::{ArtifactStore, ConversationStore, PlanStore, PromptProcessor, ResponseEngine};

use crate::auth::AuthContext;
use crate::routes;

/// Everything a route handler needs: the orchestration engine plus the repository traits it
/// doesn't own directly (plan/artifact lookups happen straight against the store, bypassing
/// `ResponseEngine`, since those read paths never touch the upstream LLM).
pub struct AppState {
    pub engine: Arc<ResponseEngine>,
    pub conversations: Arc<dyn ConversationStore>,
    pub plans: Arc<dyn PlanStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub prompt_processor: Arc<PromptProcessor>,
    pub config: GatewayConfig,
    pub auth: Arc<dyn AuthContext>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::responses::router())
        .merge(routes::artifacts::router())
        .with_state(state)
}
