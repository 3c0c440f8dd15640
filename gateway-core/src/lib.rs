//! # gateway-core
//!
//! Core domain logic for an LLM response-orchestration gateway: a prompt-module pipeline, a
//! streaming upstream bridge, conversation/plan/artifact persistence, and the `ResponseEngine`
//! that wires them into one request lifecycle.
//!
//! ## Design principles
//!
//! - **One entry point per request**: [`ResponseEngine::create`] and [`ResponseEngine::stream`]
//!   are the only things a caller needs to drive a response from request to completion.
//! - **Modules, not branches**: system-prompt composition is a priority-ordered pipeline of
//!   small, individually-testable [`prompt::PromptModule`] implementations rather than one
//!   monolithic prompt builder.
//! - **Repository traits, in-memory by default**: [`conversation::ConversationStore`],
//!   [`plan::PlanStore`], [`artifact::ArtifactStore`], and [`response::ResponseStore`] are
//!   trait boundaries; the `InMemory*` implementations stand in for a database driver, which
//!   is out of scope for this crate.
//! - **One error type**: every fallible operation returns [`error::GatewayError`], tagged with
//!   a stable id, an originating layer, and a kind that maps directly to an HTTP status.
//!
//! ## Main modules
//!
//! - [`message`]: [`message::ChatMessage`], [`message::Role`], [`message::MessageContent`] —
//!   the wire shape exchanged with the upstream provider and stored in conversation items.
//! - [`prompt`]: [`prompt::PromptProcessor`], [`prompt::PromptModule`], [`prompt::PromptContext`],
//!   and the built-in module set (timing, project instructions, user profile, memory, tool
//!   instructions, code-assistant, chain-of-thought, deep-research, persona).
//! - [`llm`]: [`llm::UpstreamChatClient`] trait and [`llm::OpenAiChatClient`], the
//!   OpenAI-compatible `/chat/completions` client used for both non-streaming and streaming
//!   dispatch.
//! - [`stream`]: [`stream::StreamBridge`] — turns upstream `StreamDelta` fragments into the
//!   typed, sequence-numbered client SSE event family defined in `response-protocol`.
//! - [`conversation`]: [`conversation::ConversationStore`], branch fork/swap, cursor pagination.
//! - [`plan`]: [`plan::PlanStore`] — the plan/task/step state machine, retry, and cancellation
//!   cascade.
//! - [`artifact`]: [`artifact::ArtifactStore`] — versioned artifacts with lineage and
//!   `IsLatest` demotion.
//! - [`response`]: [`response::Response`] and [`response::ResponseEngine`], the orchestration
//!   entry point.
//! - [`error`]: [`error::GatewayError`], [`error::ErrorKind`], [`error::Layer`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gateway_core::artifact::InMemoryArtifactStore;
//! use gateway_core::conversation::InMemoryConversationStore;
//! use gateway_core::llm::OpenAiChatClient;
//! use gateway_core::prompt::PromptProcessor;
//! use gateway_core::response::{InMemoryResponseStore, ResponseEngine};
//!
//! # fn build() -> ResponseEngine {
//! let processor = Arc::new(PromptProcessor::with_defaults("a helpful assistant".to_string()));
//! let upstream = Arc::new(OpenAiChatClient::new("https://api.openai.com/v1".to_string()));
//! let conversations = Arc::new(InMemoryConversationStore::new());
//! let responses = Arc::new(InMemoryResponseStore::new());
//! let _artifacts = InMemoryArtifactStore::new();
//!
//! ResponseEngine::new(processor, upstream, conversations, responses)
//! # }
//! ```

pub mod artifact;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod message;
pub mod plan;
pub mod prompt;
pub mod response;
pub mod stream;

pub use artifact::{Artifact, ArtifactFilter, ArtifactStore, ContentType, InMemoryArtifactStore, RetentionPolicy};
pub use conversation::{Conversation, ConversationStore, InMemoryConversationStore, Item, ItemRole, ItemStatus, ItemType};
pub use error::{ErrorKind, GatewayError, Layer};
pub use llm::{CompletionRequest, FinishReason, LlmResponse, LlmUsage, OpenAiChatClient, StreamDelta, UpstreamChatClient};
pub use message::{ChatMessage, MessageContent, MessagePart, Role};
pub use plan::{InMemoryPlanStore, Plan, PlanStore, Status as PlanStatus, Step, Task};
pub use prompt::{PromptContext, PromptModule, PromptProcessor};
pub use response::{CreateResponseParams, InMemoryResponseStore, Response, ResponseEngine, ResponseStatus, ResponseStore};
pub use stream::StreamBridge;

#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
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
