//! OpenAI-compatible chat-completions client.
//!
//! Built directly on `reqwest` + `eventsource-stream` rather than a typed OpenAI SDK: the
//! upstream `/chat/completions` response sometimes carries a non-standard
//! `delta.reasoning_content` field (seen on OpenAI-compatible proxies in front of reasoning
//! models), and a client that deserializes into a fixed response struct silently drops any
//! field it doesn't declare. Reading the raw JSON line keeps that field intact.

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{
    estimate_usage, CompletionRequest, FinishReason, LlmResponse, LlmUsage, StreamDelta,
    ToolChoiceMode, UpstreamChatClient,
};
use crate::error::GatewayError;
use crate::message::{ChatMessage, FunctionCall, MessageContent, MessagePart, Role, ToolCall};

pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn request_body(req: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(message_to_json).collect();
        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });
        let obj = body.as_object_mut().expect("object literal");
        if let Some(t) = req.temperature {
            obj.insert("temperature".into(), json!(t));
        }
        if let Some(p) = req.top_p {
            obj.insert("top_p".into(), json!(p));
        }
        if let Some(k) = req.top_k {
            obj.insert("top_k".into(), json!(k));
        }
        if let Some(m) = req.max_tokens {
            obj.insert("max_tokens".into(), json!(m));
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), json!(tools));
        }
        if let Some(choice) = req.tool_choice {
            let v = match choice {
                ToolChoiceMode::Auto => json!("auto"),
                ToolChoiceMode::None => json!("none"),
                ToolChoiceMode::Required => json!("required"),
            };
            obj.insert("tool_choice".into(), v);
        }
        if stream {
            obj.insert("stream_options".into(), json!({"include_usage": true}));
        }
        body
    }

    async fn send(&self, api_key: Option<&str>, body: &Value) -> Result<reqwest::Response, GatewayError> {
        let url = self.chat_completions_url();
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = api_key {
            if !key.is_empty() {
                request = request.bearer_auth(key);
            }
        }
        let trace_id = Uuid::new_v4();
        debug!(trace_id = %trace_id, url = %url, "upstream chat completion request");
        trace!(trace_id = %trace_id, body = %body, "upstream request body");

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::external(format!("upstream request failed: {}", e)).with_source(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let trimmed: String = text.chars().take(2000).collect();
            warn!(trace_id = %trace_id, status = %status, body = %trimmed, "upstream returned error status");
            return Err(GatewayError::external(format!(
                "upstream returned {}: {}",
                status, trimmed
            )));
        }
        Ok(response)
    }
}

fn message_to_json(m: &ChatMessage) -> Value {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::Function => "function",
    };
    let mut obj = serde_json::Map::new();
    obj.insert("role".into(), json!(role));

    match &m.content {
        Some(MessageContent::Text(t)) => {
            obj.insert("content".into(), json!(t));
        }
        Some(MessageContent::Parts(parts)) => {
            let parts: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    MessagePart::Text { text } => json!({"type": "text", "text": text}),
                    MessagePart::ImageRef { url } => {
                        json!({"type": "image_url", "image_url": {"url": url}})
                    }
                })
                .collect();
            obj.insert("content".into(), json!(parts));
        }
        None => {
            obj.insert("content".into(), Value::Null);
        }
    }

    if let Some(tool_calls) = &m.tool_calls {
        let tool_calls: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": tc.call_type,
                    "function": {"name": tc.function.name, "arguments": tc.function.arguments},
                })
            })
            .collect();
        obj.insert("tool_calls".into(), json!(tool_calls));
    }
    if let Some(fc) = &m.function_call {
        obj.insert(
            "function_call".into(),
            json!({"name": fc.name, "arguments": fc.arguments}),
        );
    }
    if let Some(id) = &m.tool_call_id {
        obj.insert("tool_call_id".into(), json!(id));
    }
    if let Some(reasoning) = &m.reasoning_content {
        obj.insert("reasoning_content".into(), json!(reasoning));
    }
    Value::Object(obj)
}

fn usage_from_json(v: &Value) -> Option<LlmUsage> {
    let u = v.get("usage")?;
    Some(LlmUsage {
        prompt_tokens: u.get("prompt_tokens")?.as_u64().unwrap_or(0) as u32,
        completion_tokens: u.get("completion_tokens")?.as_u64().unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens")?.as_u64().unwrap_or(0) as u32,
    })
}

#[async_trait]
impl UpstreamChatClient for OpenAiChatClient {
    async fn complete(
        &self,
        api_key: Option<&str>,
        req: &CompletionRequest,
    ) -> Result<LlmResponse, GatewayError> {
        let sanitized = req.sanitized();
        let body = Self::request_body(&sanitized, false);
        let response = self.send(api_key, &body).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::external(format!("invalid upstream response: {}", e)).with_source(e))?;

        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| GatewayError::external("upstream returned no choices"))?;
        let message = choice.get("message").cloned().unwrap_or(Value::Null);

        let content = message.get("content").and_then(|c| c.as_str()).map(String::from);
        let reasoning_content = message
            .get("reasoning_content")
            .and_then(|c| c.as_str())
            .map(String::from);
        let tool_calls = parse_tool_calls(message.get("tool_calls"));
        let function_call = message.get("function_call").and_then(parse_function_call);
        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(FinishReason::from_upstream)
            .unwrap_or(FinishReason::Stop);

        let usage = usage_from_json(&value)
            .unwrap_or_else(|| estimate_usage(&prompt_text(&sanitized.messages), content.as_deref().unwrap_or("")));

        Ok(LlmResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: content.map(MessageContent::Text),
                tool_calls,
                function_call,
                reasoning_content,
                tool_call_id: None,
            },
            usage: Some(usage),
            finish_reason,
        })
    }

    async fn stream(
        &self,
        api_key: Option<&str>,
        req: &CompletionRequest,
        delta_tx: mpsc::Sender<StreamDelta>,
    ) -> Result<LlmResponse, GatewayError> {
        let sanitized = req.sanitized();
        let body = Self::request_body(&sanitized, true);
        let response = self.send(api_key, &body).await?;

        let mut events = response.bytes_stream().eventsource();

        let mut full_content = String::new();
        let mut full_reasoning = String::new();
        let mut tool_call_map: HashMap<u32, (Option<String>, String, String)> = HashMap::new();
        let mut function_call_acc: Option<(String, String)> = None;
        let mut stream_usage: Option<LlmUsage> = None;
        let mut finish_reason = FinishReason::Stop;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| {
                GatewayError::external(format!("upstream stream read failed: {}", e))
            })?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            if let Some(usage) = usage_from_json(&chunk) {
                stream_usage = Some(usage);
            }

            let Some(choices) = chunk.get("choices").and_then(|c| c.as_array()) else {
                continue;
            };
            for choice in choices {
                if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
                    finish_reason = FinishReason::from_upstream(fr);
                }
                let Some(delta) = choice.get("delta") else {
                    continue;
                };

                if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
                    if !content.is_empty() {
                        full_content.push_str(content);
                        let _ = delta_tx.send(StreamDelta::Text(content.to_string())).await;
                    }
                }
                if let Some(reasoning) = delta.get("reasoning_content").and_then(|c| c.as_str()) {
                    if !reasoning.is_empty() {
                        full_reasoning.push_str(reasoning);
                        let _ = delta_tx
                            .send(StreamDelta::Reasoning(reasoning.to_string()))
                            .await;
                    }
                }
                if let Some(fc) = delta.get("function_call") {
                    let name = fc.get("name").and_then(|n| n.as_str()).map(String::from);
                    let args = fc.get("arguments").and_then(|a| a.as_str()).unwrap_or("");
                    let entry = function_call_acc.get_or_insert_with(|| (String::new(), String::new()));
                    if let Some(n) = &name {
                        entry.0.push_str(n);
                    }
                    entry.1.push_str(args);
                    let _ = delta_tx
                        .send(StreamDelta::FunctionCall {
                            name,
                            arguments_delta: args.to_string(),
                        })
                        .await;
                }
                if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                    for tc in tool_calls {
                        let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as u32;
                        let id = tc.get("id").and_then(|i| i.as_str()).map(String::from);
                        let function = tc.get("function");
                        let name = function
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .map(String::from);
                        let args = function
                            .and_then(|f| f.get("arguments"))
                            .and_then(|a| a.as_str())
                            .unwrap_or("");

                        let entry = tool_call_map.entry(index).or_insert_with(|| {
                            (None, String::new(), String::new())
                        });
                        if let Some(id) = &id {
                            entry.0 = Some(id.clone());
                        }
                        if let Some(name) = &name {
                            entry.1.push_str(name);
                        }
                        entry.2.push_str(args);

                        let _ = delta_tx
                            .send(StreamDelta::ToolCall {
                                index,
                                id,
                                name,
                                arguments_delta: args.to_string(),
                            })
                            .await;
                    }
                }
            }
        }

        let mut indices: Vec<u32> = tool_call_map.keys().copied().collect();
        indices.sort_unstable();
        let tool_calls: Vec<ToolCall> = indices
            .into_iter()
            .map(|idx| {
                let (id, name, arguments) = tool_call_map.remove(&idx).expect("key present");
                ToolCall {
                    id: id.unwrap_or_else(|| format!("call_{}", idx)),
                    call_type: "function".to_string(),
                    function: FunctionCall { name, arguments },
                }
            })
            .collect();

        let any_tool_call_complete = tool_calls
            .iter()
            .any(|tc| !tc.function.name.is_empty() && tc.function.arguments.ends_with('}'));
        let function_call = function_call_acc.map(|(name, arguments)| FunctionCall { name, arguments });
        let function_call_complete = function_call
            .as_ref()
            .is_some_and(|fc| !fc.name.is_empty() && fc.arguments.ends_with('}'));

        if finish_reason == FinishReason::Stop {
            if any_tool_call_complete {
                finish_reason = FinishReason::ToolCalls;
            } else if function_call_complete {
                finish_reason = FinishReason::FunctionCall;
            }
        }

        let usage = stream_usage
            .unwrap_or_else(|| estimate_usage(&prompt_text(&sanitized.messages), &full_content));

        Ok(LlmResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: if full_content.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(full_content))
                },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                function_call,
                reasoning_content: if full_reasoning.is_empty() {
                    None
                } else {
                    Some(full_reasoning)
                },
                tool_call_id: None,
            },
            usage: Some(usage),
            finish_reason,
        })
    }
}

fn parse_tool_calls(v: Option<&Value>) -> Option<Vec<ToolCall>> {
    let arr = v?.as_array()?;
    if arr.is_empty() {
        return None;
    }
    Some(
        arr.iter()
            .filter_map(|tc| {
                let id = tc.get("id")?.as_str()?.to_string();
                let function = tc.get("function")?;
                let name = function.get("name")?.as_str()?.to_string();
                let arguments = function.get("arguments")?.as_str()?.to_string();
                Some(ToolCall {
                    id,
                    call_type: "function".to_string(),
                    function: FunctionCall { name, arguments },
                })
            })
            .collect(),
    )
}

fn parse_function_call(v: &Value) -> Option<FunctionCall> {
    Some(FunctionCall {
        name: v.get("name")?.as_str()?.to_string(),
        arguments: v.get("arguments")?.as_str()?.to_string(),
    })
}

fn prompt_text(messages: &[ChatMessage]) -> String {
    messages.iter().map(|m| m.text()).collect::<Vec<_>>().join(" ")
}
