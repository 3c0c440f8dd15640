//! HTTP/SSE surface for the gateway.
//!
//! Wires [`gateway_core`]'s domain types (the prompt pipeline, the in-memory stores, and
//! `ResponseEngine`) behind an axum router implementing the route table: response create/read/
//! cancel, conversation item listing, plan/task inspection, and artifact read/delete.
//!
//! **Public API**: [`run_server`], [`run_server_on_listener`].

pub mod app;
pub mod auth;
pub mod error_response;
pub mod routes;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use gateway_config::GatewayConfig;
use gateway_core::artifact::InMemoryArtifactStore;
use gateway_core::conversation::InMemoryConversationStore;
use gateway_core::llm::OpenAiChatClient;
use gateway_core::plan::InMemoryPlanStore;
use gateway_core::prompt::PromptProcessor;
use gateway_core::response::InMemoryResponseStore;
use gateway_core::ResponseEngine;

use app::AppState;
use auth::DevBearerAuth;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Builds the default `AppState`: in-memory repositories, the OpenAI-compatible upstream
/// client, and the development-only bearer auth. A production deployment would replace the
/// repository trait objects with real database-backed implementations and `auth` with a
/// verifying `AuthContext`; everything else is reused as-is.
pub fn default_state(config: GatewayConfig) -> Arc<AppState> {
    let upstream = Arc::new(OpenAiChatClient::new(config.upstream_base_url.clone()));
    let conversations = Arc::new(InMemoryConversationStore::new());
    let plans = Arc::new(InMemoryPlanStore::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let responses = Arc::new(InMemoryResponseStore::new());
    let prompt_processor = Arc::new(PromptProcessor::with_defaults(config.default_persona.clone()));

    let engine = Arc::new(
        ResponseEngine::new(prompt_processor.clone(), upstream, conversations.clone(), responses)
            .with_timeouts(config.complete_timeout, config.stream_timeout)
            .with_flush_word_count(config.text_flush_word_count),
    );

    Arc::new(AppState {
        engine,
        conversations,
        plans,
        artifacts,
        prompt_processor,
        config,
        auth: Arc::new(DevBearerAuth),
    })
}

/// Runs the HTTP/SSE server on an existing listener. Used by tests (bind to `127.0.0.1:0` then
/// pass the listener in) and by [`run_server`].
pub async fn run_server_on_listener(
    listener: TcpListener,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("gateway HTTP server listening on http://{}", addr);

    let config = GatewayConfig::from_env();
    let state = default_state(config);
    let router = app::router(state);

    axum::serve(listener, router).await?;
    Ok(())
}

/// Runs the HTTP/SSE server. Listens on `addr` (default `127.0.0.1:8080`).
pub async fn run_server(addr: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_server_on_listener(listener).await
}

#[cfg(test)]
mod test_logging {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor::ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
