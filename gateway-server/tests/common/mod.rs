//! Shared test app builder: wires a stub upstream behind the real route table so the HTTP
//! surface can be exercised with `tower::ServiceExt::oneshot` without a network call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gateway_config::GatewayConfig;
use gateway_core::artifact::InMemoryArtifactStore;
use gateway_core::conversation::InMemoryConversationStore;
use gateway_core::llm::{CompletionRequest, FinishReason, LlmResponse, StreamDelta, UpstreamChatClient};
use gateway_core::plan::InMemoryPlanStore;
use gateway_core::prompt::PromptProcessor;
use gateway_core::response::InMemoryResponseStore;
use gateway_core::{ChatMessage, GatewayError, ResponseEngine};
use gateway_server::app::{self, AppState};
use gateway_server::auth::DevBearerAuth;

/// Always answers "stub reply", never touches the network.
pub struct StubUpstream;

#[async_trait]
impl UpstreamChatClient for StubUpstream {
    async fn complete(
        &self,
        _api_key: Option<&str>,
        _req: &CompletionRequest,
    ) -> Result<LlmResponse, GatewayError> {
        Ok(LlmResponse {
            message: ChatMessage::assistant("stub reply"),
            usage: None,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn stream(
        &self,
        _api_key: Option<&str>,
        _req: &CompletionRequest,
        delta_tx: mpsc::Sender<StreamDelta>,
    ) -> Result<LlmResponse, GatewayError> {
        let _ = delta_tx.send(StreamDelta::Text("stub reply".to_string())).await;
        Ok(LlmResponse {
            message: ChatMessage::assistant("stub reply"),
            usage: None,
            finish_reason: FinishReason::Stop,
        })
    }
}

pub fn test_router() -> axum::Router {
    let conversations = Arc::new(InMemoryConversationStore::new());
    let plans = Arc::new(InMemoryPlanStore::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let responses = Arc::new(InMemoryResponseStore::new());
    let config = GatewayConfig::default();
    let prompt_processor = Arc::new(PromptProcessor::with_defaults(config.default_persona.clone()));

    let engine = Arc::new(
        ResponseEngine::new(prompt_processor.clone(), Arc::new(StubUpstream), conversations.clone(), responses)
            .with_timeouts(config.complete_timeout, config.stream_timeout)
            .with_flush_word_count(config.text_flush_word_count),
    );

    let state = Arc::new(AppState {
        engine,
        conversations,
        plans,
        artifacts,
        prompt_processor,
        config,
        auth: Arc::new(DevBearerAuth),
    });

    app::router(state)
}
