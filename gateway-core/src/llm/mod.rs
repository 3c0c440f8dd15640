//! Upstream chat-completion client: the gateway's one point of contact with the inference
//! provider. Sanitizes outgoing messages, performs non-streaming and streaming calls, and
//! estimates token usage when the upstream omits it.

mod openai;

pub use openai::OpenAiChatClient;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::message::{sanitize, ChatMessage};

/// Tool choice mode for chat completions: when tools are present, controls whether the
/// model may choose (auto), must not use (none), or must use (required).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!(
                "unknown tool_choice: {} (use auto, none, or required)",
                s
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Why the upstream stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    FunctionCall,
    ToolCalls,
    Unknown,
}

impl FinishReason {
    pub fn from_upstream(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "function_call" => Self::FunctionCall,
            "tool_calls" => Self::ToolCalls,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A chat-completion request, upstream-agnostic.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoiceMode>,
}

impl CompletionRequest {
    /// Sanitizes messages and clears `tool_choice` when no tools are present, per the
    /// pre-dispatch contract every upstream call must apply.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        out.messages = sanitize(&out.messages);
        if out.tools.is_empty() {
            out.tool_choice = None;
        }
        out
    }
}

/// Full upstream response: final assistant message, usage, and finish reason.
#[derive(Clone, Debug)]
pub struct LlmResponse {
    pub message: ChatMessage,
    pub usage: Option<LlmUsage>,
    pub finish_reason: FinishReason,
}

/// One incremental fragment from a streaming completion, keyed so the caller can
/// accumulate it into a final message. Indices follow the upstream's own tool_call index;
/// a bare function_call (legacy, non-array) fragment uses index 0.
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Text(String),
    Reasoning(String),
    FunctionCall {
        name: Option<String>,
        arguments_delta: String,
    },
    ToolCall {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    Usage(LlmUsage),
}

/// Estimates token usage by splitting whitespace when the upstream doesn't report real
/// counts (some OpenAI-compatible proxies omit `usage` entirely).
pub fn estimate_usage(prompt_text: &str, completion_text: &str) -> LlmUsage {
    let prompt_tokens = prompt_text.split_whitespace().count() as u32;
    let completion_tokens = completion_text.split_whitespace().count() as u32;
    LlmUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

/// Upstream OpenAI-compatible chat-completions client.
#[async_trait]
pub trait UpstreamChatClient: Send + Sync {
    /// Non-streaming completion. Default timeout: 120s, enforced by the caller via the
    /// supplied deadline-bearing future (see `ResponseEngine`).
    async fn complete(
        &self,
        api_key: Option<&str>,
        req: &CompletionRequest,
    ) -> Result<LlmResponse, GatewayError>;

    /// Streaming completion: emits `StreamDelta` fragments through `delta_tx` as they
    /// arrive, and returns the fully accumulated response once the upstream stream ends.
    /// Default timeout: 600s, enforced by the caller.
    async fn stream(
        &self,
        api_key: Option<&str>,
        req: &CompletionRequest,
        delta_tx: mpsc::Sender<StreamDelta>,
    ) -> Result<LlmResponse, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_mode_from_str_parses_known_values() {
        assert_eq!("auto".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Auto);
        assert_eq!("none".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::None);
        assert_eq!(
            "required".parse::<ToolChoiceMode>().unwrap(),
            ToolChoiceMode::Required
        );
    }

    #[test]
    fn tool_choice_mode_from_str_rejects_unknown_value() {
        let err = "unexpected".parse::<ToolChoiceMode>().unwrap_err();
        assert!(err.contains("unknown tool_choice"));
    }

    #[test]
    fn sanitized_clears_tool_choice_when_no_tools() {
        let req = CompletionRequest {
            model: "gpt-5".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            tools: vec![],
            tool_choice: Some(ToolChoiceMode::Required),
        };
        let out = req.sanitized();
        assert_eq!(out.tool_choice, None);
    }

    #[test]
    fn estimate_usage_counts_whitespace_tokens() {
        let usage = estimate_usage("hello world", "one two three");
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 5);
    }

    #[test]
    fn finish_reason_from_upstream_maps_known_strings() {
        assert_eq!(FinishReason::from_upstream("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_upstream("weird"), FinishReason::Unknown);
    }
}
