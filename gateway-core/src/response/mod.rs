//! The Response entity and `ResponseEngine`: the orchestration entry point that ties the
//! prompt pipeline, upstream client, stream bridge, and conversation store together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conversation::{ConversationStore, Item, ItemRole, ItemType, NewItem};
use crate::error::GatewayError;
use crate::llm::{CompletionRequest, FinishReason, LlmUsage, StreamDelta, ToolChoiceMode, ToolSpec, UpstreamChatClient};
use crate::message::{ChatMessage, MessageContent};
use crate::prompt::PromptProcessor;
use crate::stream::StreamBridge;
use response_protocol::{to_json, ResponseEvent, SequenceState};

pub const DEFAULT_NON_STREAM_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ResponseStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Response {
    pub id: u64,
    pub public_id: String,
    pub user_id: String,
    pub conversation_id: Option<u64>,
    pub model: String,
    pub status: ResponseStatus,
    pub input: Value,
    pub output: Vec<Value>,
    pub usage: Option<LlmUsage>,
    pub stream: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub previous_response_id: Option<String>,
}

impl Response {
    /// The DTO mirrored into `response.created` / `response.completed` event payloads and
    /// returned by the `GET /v1/responses/:id` route.
    pub fn to_dto(&self) -> Value {
        serde_json::json!({
            "id": self.public_id,
            "object": "response",
            "status": match self.status {
                ResponseStatus::Queued => "queued",
                ResponseStatus::Running => "running",
                ResponseStatus::Completed => "completed",
                ResponseStatus::Failed => "failed",
                ResponseStatus::Cancelled => "cancelled",
            },
            "model": self.model,
            "output": self.output,
            "usage": self.usage,
            "created_at": self.created_at,
            "previous_response_id": self.previous_response_id,
        })
    }
}

/// Caller-supplied request to create a response, matching the recognized fields of
/// `CreateResponseRequest` (model, input, stream flag, sampling params, tool definitions,
/// conversation/previous response linkage). `system_prompt` is merged into `input` by the
/// caller before this struct is built.
#[derive(Clone, Debug)]
pub struct CreateResponseParams {
    pub user_id: String,
    pub model: String,
    pub input: Vec<ChatMessage>,
    pub raw_input: Value,
    pub stream: bool,
    pub conversation_public_id: Option<String>,
    pub previous_response_id: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoiceMode>,
}

#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn create(&self, params: &CreateResponseParams, conversation_id: Option<u64>) -> Result<Response, GatewayError>;
    async fn get(&self, public_id: &str) -> Result<Response, GatewayError>;
    async fn update(&self, public_id: &str, f: Box<dyn FnOnce(&mut Response) + Send>) -> Result<Response, GatewayError>;
}

struct ResponseInner {
    responses: HashMap<u64, Response>,
    by_public_id: HashMap<String, u64>,
    next_id: u64,
}

pub struct InMemoryResponseStore {
    inner: Arc<RwLock<ResponseInner>>,
}

impl Default for InMemoryResponseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ResponseInner {
                responses: HashMap::new(),
                by_public_id: HashMap::new(),
                next_id: 1,
            })),
        }
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn create(&self, params: &CreateResponseParams, conversation_id: Option<u64>) -> Result<Response, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let public_id = format!("resp_{}", Uuid::new_v4());
        let response = Response {
            id,
            public_id: public_id.clone(),
            user_id: params.user_id.clone(),
            conversation_id,
            model: params.model.clone(),
            status: ResponseStatus::Running,
            input: params.raw_input.clone(),
            output: Vec::new(),
            usage: None,
            stream: params.stream,
            error_message: None,
            created_at: Utc::now(),
            cancelled_at: None,
            previous_response_id: params.previous_response_id.clone(),
        };
        inner.responses.insert(id, response.clone());
        inner.by_public_id.insert(public_id, id);
        Ok(response)
    }

    async fn get(&self, public_id: &str) -> Result<Response, GatewayError> {
        let inner = self.inner.read().await;
        let id = inner
            .by_public_id
            .get(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("response {} not found", public_id)))?;
        Ok(inner.responses.get(id).expect("id from index").clone())
    }

    async fn update(&self, public_id: &str, f: Box<dyn FnOnce(&mut Response) + Send>) -> Result<Response, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = *inner
            .by_public_id
            .get(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("response {} not found", public_id)))?;
        let response = inner.responses.get_mut(&id).expect("id from index");
        f(response);
        Ok(response.clone())
    }
}

fn assistant_text(message: &ChatMessage) -> String {
    message.text()
}

/// Entry point tying the prompt pipeline, upstream client, conversation store, and — for
/// streaming requests — the stream bridge together into one request lifecycle.
pub struct ResponseEngine {
    prompt_processor: Arc<PromptProcessor>,
    upstream: Arc<dyn UpstreamChatClient>,
    conversation_store: Arc<dyn ConversationStore>,
    response_store: Arc<dyn ResponseStore>,
    non_stream_timeout: Duration,
    stream_timeout: Duration,
    flush_word_count: usize,
}

impl ResponseEngine {
    pub fn new(
        prompt_processor: Arc<PromptProcessor>,
        upstream: Arc<dyn UpstreamChatClient>,
        conversation_store: Arc<dyn ConversationStore>,
        response_store: Arc<dyn ResponseStore>,
    ) -> Self {
        Self {
            prompt_processor,
            upstream,
            conversation_store,
            response_store,
            non_stream_timeout: DEFAULT_NON_STREAM_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            flush_word_count: crate::stream::DEFAULT_FLUSH_WORD_COUNT,
        }
    }

    pub fn with_timeouts(mut self, non_stream: Duration, stream: Duration) -> Self {
        self.non_stream_timeout = non_stream;
        self.stream_timeout = stream;
        self
    }

    /// Minimum whitespace-separated tokens [`StreamBridge`] buffers before flushing a
    /// text/reasoning delta event.
    pub fn with_flush_word_count(mut self, flush_word_count: usize) -> Self {
        self.flush_word_count = flush_word_count;
        self
    }

    fn validate(params: &CreateResponseParams) -> Result<(), GatewayError> {
        if params.model.trim().is_empty() {
            return Err(GatewayError::validation("model is required"));
        }
        if params.input.is_empty() {
            return Err(GatewayError::validation("input must not be empty"));
        }
        Ok(())
    }

    async fn resolve_conversation_id(&self, params: &CreateResponseParams) -> Result<Option<u64>, GatewayError> {
        match &params.conversation_public_id {
            Some(public_id) => {
                let conv = self.conversation_store.find_by_public_id(public_id).await?;
                Ok(Some(conv.id))
            }
            None => Ok(None),
        }
    }

    fn completion_request(&self, params: &CreateResponseParams, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: params.model.clone(),
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            max_tokens: params.max_tokens,
            tools: params.tools.clone(),
            tool_choice: params.tool_choice,
        }
        .sanitized()
    }

    async fn append_assistant_items(
        &self,
        conversation_id: u64,
        response_public_id: &str,
        message: &ChatMessage,
        finish_reason: FinishReason,
    ) -> Result<(), GatewayError> {
        let text = assistant_text(message);
        if !text.trim().is_empty() {
            self.conversation_store
                .append(
                    conversation_id,
                    NewItem {
                        response_id: Some(response_public_id.to_string()),
                        ..NewItem::text(ItemRole::Assistant, text)
                    },
                )
                .await?;
        }

        match finish_reason {
            FinishReason::FunctionCall => {
                if let Some(call) = &message.function_call {
                    let mut item = NewItem::text(
                        ItemRole::Assistant,
                        format!("{}({})", call.name, call.arguments),
                    );
                    item.item_type = ItemType::Function;
                    item.response_id = Some(response_public_id.to_string());
                    self.conversation_store.append(conversation_id, item).await?;
                }
            }
            FinishReason::ToolCalls => {
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        let mut item = NewItem::text(
                            ItemRole::Assistant,
                            format!("{}({})", call.function.name, call.function.arguments),
                        );
                        item.item_type = ItemType::Function;
                        item.call_id = Some(call.id.clone());
                        item.response_id = Some(response_public_id.to_string());
                        self.conversation_store.append(conversation_id, item).await?;
                    }
                }
            }
            FinishReason::Stop | FinishReason::Length | FinishReason::ContentFilter | FinishReason::Unknown => {}
        }
        Ok(())
    }

    /// Non-streaming path: runs the prompt pipeline, dispatches one `complete` call, applies
    /// finish_reason side effects, and updates the Response row in a single write.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        mut prompt_ctx: crate::prompt::PromptContext,
        params: CreateResponseParams,
    ) -> Result<Response, GatewayError> {
        Self::validate(&params)?;
        let conversation_id = self.resolve_conversation_id(&params).await?;
        let response = self.response_store.create(&params, conversation_id).await?;

        let outcome = tokio::time::timeout(
            self.non_stream_timeout,
            self.prompt_processor.process(cancel, &mut prompt_ctx, params.input.clone()),
        )
        .await
        .map_err(|_| GatewayError::deadline_exceeded("prompt pipeline timed out"))?
        .map_err(|e| e.cause)?;

        let req = self.completion_request(&params, outcome.messages);

        let llm_result = tokio::time::timeout(
            self.non_stream_timeout,
            self.upstream.complete(params.api_key.as_deref(), &req),
        )
        .await;

        let llm_response = match llm_result {
            Err(_) => {
                let failed = self
                    .response_store
                    .update(
                        &response.public_id,
                        Box::new(|r| {
                            r.status = ResponseStatus::Failed;
                            r.error_message = Some("upstream request timed out".to_string());
                        }),
                    )
                    .await?;
                return Err(GatewayError::deadline_exceeded(format!(
                    "response {} timed out waiting on upstream",
                    failed.public_id
                )));
            }
            Ok(Err(err)) => {
                self.response_store
                    .update(
                        &response.public_id,
                        Box::new({
                            let message = err.message.clone();
                            move |r| {
                                r.status = ResponseStatus::Failed;
                                r.error_message = Some(message);
                            }
                        }),
                    )
                    .await?;
                return Err(err.wrap(crate::error::Layer::Domain, "complete() failed"));
            }
            Ok(Ok(resp)) => resp,
        };

        if let Some(conversation_id) = conversation_id {
            self.append_assistant_items(
                conversation_id,
                &response.public_id,
                &llm_response.message,
                llm_response.finish_reason,
            )
            .await?;
        }

        let output = vec![serde_json::json!({
            "type": "message",
            "role": "assistant",
            "content": match &llm_response.message.content {
                Some(MessageContent::Text(t)) => t.clone(),
                _ => llm_response.message.text(),
            },
        })];

        let usage = llm_response.usage.clone();
        let final_response = self
            .response_store
            .update(
                &response.public_id,
                Box::new(move |r| {
                    r.status = ResponseStatus::Completed;
                    r.output = output;
                    r.usage = usage;
                }),
            )
            .await?;
        Ok(final_response)
    }

    /// Streaming path: emits `response.created`, then bridges the upstream stream into
    /// typed client SSE frames via `StreamBridge`, and finally emits `response.completed`
    /// once the producer and consumer have both finished.
    pub async fn stream(
        &self,
        cancel: CancellationToken,
        mut prompt_ctx: crate::prompt::PromptContext,
        params: CreateResponseParams,
        out_tx: mpsc::Sender<Value>,
    ) -> Result<Response, GatewayError> {
        Self::validate(&params)?;
        let conversation_id = self.resolve_conversation_id(&params).await?;
        let response = self.response_store.create(&params, conversation_id).await?;
        let mut seq = SequenceState::new(response.public_id.clone());

        let created_event = to_json(&ResponseEvent::Created { response: response.to_dto() }, &mut seq)
            .map_err(|e| GatewayError::external(format!("failed to encode response.created: {}", e)))?;
        let _ = out_tx.send(created_event).await;

        let outcome = match self.prompt_processor.process(&cancel, &mut prompt_ctx, params.input.clone()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                return self.fail_stream(&response.public_id, &mut seq, &out_tx, err.cause).await;
            }
        };

        let req = self.completion_request(&params, outcome.messages);
        let (delta_tx, delta_rx) = mpsc::channel::<StreamDelta>(64);
        let upstream = self.upstream.clone();
        let api_key = params.api_key.clone();
        let stream_timeout = self.stream_timeout;

        let producer = tokio::spawn(async move {
            tokio::time::timeout(stream_timeout, upstream.stream(api_key.as_deref(), &req, delta_tx)).await
        });

        let bridge = StreamBridge::with_flush_word_count(self.flush_word_count);
        let bridge_result = tokio::select! {
            res = bridge.run(delta_rx, &mut seq, &out_tx) => res,
            _ = cancel.cancelled() => Err(GatewayError::cancelled("client disconnected")),
        };

        if let Err(err) = bridge_result {
            producer.abort();
            return self.fail_stream(&response.public_id, &mut seq, &out_tx, err).await;
        }

        let llm_response = match producer.await {
            Err(join_err) => {
                return self
                    .fail_stream(
                        &response.public_id,
                        &mut seq,
                        &out_tx,
                        GatewayError::new(
                            crate::error::ErrorKind::Unknown,
                            crate::error::Layer::Domain,
                            format!("stream producer task failed: {}", join_err),
                        ),
                    )
                    .await;
            }
            Ok(Err(_elapsed)) => {
                return self
                    .fail_stream(
                        &response.public_id,
                        &mut seq,
                        &out_tx,
                        GatewayError::deadline_exceeded("upstream stream timed out"),
                    )
                    .await;
            }
            Ok(Ok(Err(err))) => {
                return self.fail_stream(&response.public_id, &mut seq, &out_tx, err).await;
            }
            Ok(Ok(Ok(resp))) => resp,
        };

        if let Some(conversation_id) = conversation_id {
            self.append_assistant_items(
                conversation_id,
                &response.public_id,
                &llm_response.message,
                llm_response.finish_reason,
            )
            .await?;
        }

        let output = vec![serde_json::json!({
            "type": "message",
            "role": "assistant",
            "content": llm_response.message.text(),
        })];
        let usage = llm_response.usage.clone();
        let final_response = self
            .response_store
            .update(
                &response.public_id,
                Box::new(move |r| {
                    r.status = ResponseStatus::Completed;
                    r.output = output;
                    r.usage = usage;
                }),
            )
            .await?;

        let completed_event = to_json(
            &ResponseEvent::Completed { response: final_response.to_dto() },
            &mut seq,
        )
        .map_err(|e| GatewayError::external(format!("failed to encode response.completed: {}", e)))?;
        let _ = out_tx.send(completed_event).await;

        Ok(final_response)
    }

    async fn fail_stream(
        &self,
        response_public_id: &str,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<Value>,
        err: GatewayError,
    ) -> Result<Response, GatewayError> {
        let status = if err.kind == crate::error::ErrorKind::Cancelled {
            ResponseStatus::Cancelled
        } else {
            ResponseStatus::Failed
        };
        let message = err.message.clone();
        let failed = self
            .response_store
            .update(
                response_public_id,
                Box::new(move |r| {
                    r.status = status;
                    r.error_message = Some(message);
                    if status == ResponseStatus::Cancelled {
                        r.cancelled_at = Some(Utc::now());
                    }
                }),
            )
            .await?;

        let error_event = to_json(
            &ResponseEvent::Error {
                code: err.kind.code().to_string(),
                message: err.message.clone(),
                response_id: Some(response_public_id.to_string()),
            },
            seq,
        )
        .map_err(|e| GatewayError::external(format!("failed to encode response.error: {}", e)))?;
        let _ = out_tx.send(error_event).await;

        Err(err)
    }

    pub async fn cancel(&self, public_id: &str) -> Result<Response, GatewayError> {
        self.response_store
            .update(
                public_id,
                Box::new(|r| {
                    if !r.status.is_terminal() {
                        r.status = ResponseStatus::Cancelled;
                        r.cancelled_at = Some(Utc::now());
                    }
                }),
            )
            .await
    }

    pub async fn get(&self, public_id: &str) -> Result<Response, GatewayError> {
        self.response_store.get(public_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::InMemoryConversationStore;
    use crate::llm::LlmResponse;
    use crate::message::Role;
    use async_trait::async_trait;

    struct StubUpstream {
        reply: String,
    }

    #[async_trait]
    impl UpstreamChatClient for StubUpstream {
        async fn complete(
            &self,
            _api_key: Option<&str>,
            _req: &CompletionRequest,
        ) -> Result<LlmResponse, GatewayError> {
            Ok(LlmResponse {
                message: ChatMessage::assistant(self.reply.clone()),
                usage: Some(LlmUsage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                }),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn stream(
            &self,
            _api_key: Option<&str>,
            _req: &CompletionRequest,
            delta_tx: mpsc::Sender<StreamDelta>,
        ) -> Result<LlmResponse, GatewayError> {
            delta_tx.send(StreamDelta::Text(self.reply.clone())).await.ok();
            Ok(LlmResponse {
                message: ChatMessage::assistant(self.reply.clone()),
                usage: None,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn engine(reply: &str) -> (ResponseEngine, Arc<InMemoryConversationStore>) {
        let conv_store = Arc::new(InMemoryConversationStore::new());
        let engine = ResponseEngine::new(
            Arc::new(PromptProcessor::new(vec![])),
            Arc::new(StubUpstream { reply: reply.to_string() }),
            conv_store.clone(),
            Arc::new(InMemoryResponseStore::new()),
        );
        (engine, conv_store)
    }

    #[tokio::test]
    async fn create_completes_and_appends_assistant_item() {
        let (engine, conv_store) = engine("hello there");
        let conv = conv_store.create("user_1").await.unwrap();

        let params = CreateResponseParams {
            user_id: "user_1".into(),
            model: "gpt-5".into(),
            input: vec![ChatMessage::user("hi")],
            raw_input: serde_json::json!({"role": "user", "content": "hi"}),
            stream: false,
            conversation_public_id: Some(conv.public_id.clone()),
            previous_response_id: None,
            api_key: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
        };

        let response = engine
            .create(&CancellationToken::new(), crate::prompt::PromptContext::default(), params)
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.usage.unwrap().total_tokens, 5);

        let items = conv_store
            .list_branch_items(conv.id, crate::conversation::MAIN_BRANCH, Default::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].role, ItemRole::Assistant);
    }

    #[tokio::test]
    async fn create_rejects_empty_model() {
        let (engine, _conv_store) = engine("hi");
        let params = CreateResponseParams {
            user_id: "user_1".into(),
            model: "".into(),
            input: vec![ChatMessage::user("hi")],
            raw_input: Value::Null,
            stream: false,
            conversation_public_id: None,
            previous_response_id: None,
            api_key: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
        };
        let err = engine
            .create(&CancellationToken::new(), crate::prompt::PromptContext::default(), params)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn stream_emits_created_then_completed() {
        let (engine, _conv_store) = engine("streamed reply");
        let (out_tx, mut out_rx) = mpsc::channel(32);
        let params = CreateResponseParams {
            user_id: "user_1".into(),
            model: "gpt-5".into(),
            input: vec![ChatMessage::user("hi")],
            raw_input: Value::Null,
            stream: true,
            conversation_public_id: None,
            previous_response_id: None,
            api_key: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
        };

        let response = engine
            .stream(
                CancellationToken::new(),
                crate::prompt::PromptContext::default(),
                params,
                out_tx,
            )
            .await
            .unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);

        let mut names = Vec::new();
        while let Some(event) = out_rx.recv().await {
            names.push(event["type"].as_str().unwrap().to_string());
        }
        assert_eq!(names.first().unwrap(), "response.created");
        assert_eq!(names.last().unwrap(), "response.completed");
    }

    #[test]
    fn assistant_text_reads_plain_string_content() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: Some(MessageContent::Text("hi".into())),
            ..Default::default()
        };
        assert_eq!(assistant_text(&msg), "hi");
    }
}
