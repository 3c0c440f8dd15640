//! Chat message types shared by the prompt pipeline and the upstream client.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
    Function,
}

/// One part of a multipart message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    ImageRef { url: String },
}

impl MessagePart {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text { text } => text.trim().is_empty(),
            Self::ImageRef { url } => url.trim().is_empty(),
        }
    }
}

/// Message body: either a plain string or a sequence of typed parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

/// A single chat message, as exchanged with the upstream provider and stored in a
/// conversation item's content.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Present on `Role::Tool` messages: the id of the tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            function_call: None,
            reasoning_content: None,
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            function_call: None,
            reasoning_content: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            function_call: None,
            reasoning_content: None,
            tool_call_id: None,
        }
    }

    /// Plain-text view of the content, ignoring multipart image references.
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(t)) => t.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::Text { text } => Some(text.as_str()),
                    MessagePart::ImageRef { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
            None => String::new(),
        }
    }
}

/// Deep-copies a message; multipart content and tool-call arrays are cloned element by
/// element so mutating the copy (e.g. during sanitization) never touches the original.
pub fn clone_message(msg: &ChatMessage) -> ChatMessage {
    ChatMessage {
        role: msg.role,
        content: msg.content.clone(),
        tool_calls: msg.tool_calls.clone(),
        function_call: msg.function_call.clone(),
        reasoning_content: msg.reasoning_content.clone(),
        tool_call_id: msg.tool_call_id.clone(),
    }
}

/// Drops empty text/image parts from multipart content and clears a message's tool_calls
/// array when it's empty. Idempotent: `sanitize(sanitize(m)) == sanitize(m)`.
pub fn sanitize(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            let mut out = clone_message(m);
            if let Some(MessageContent::Parts(parts)) = &out.content {
                let filtered: Vec<MessagePart> =
                    parts.iter().filter(|p| !p.is_empty()).cloned().collect();
                out.content = if filtered.is_empty() {
                    None
                } else {
                    Some(MessageContent::Parts(filtered))
                };
            }
            if matches!(&out.tool_calls, Some(v) if v.is_empty()) {
                out.tool_calls = None;
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_empty_text_and_image_parts() {
        let msg = ChatMessage {
            role: Role::User,
            content: Some(MessageContent::Parts(vec![
                MessagePart::Text {
                    text: "  ".to_string(),
                },
                MessagePart::Text {
                    text: "hello".to_string(),
                },
                MessagePart::ImageRef {
                    url: String::new(),
                },
            ])),
            tool_calls: None,
            function_call: None,
            reasoning_content: None,
            tool_call_id: None,
        };
        let out = sanitize(&[msg]);
        match &out[0].content {
            Some(MessageContent::Parts(parts)) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0], MessagePart::Text { text: "hello".into() });
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn sanitize_nulls_content_when_all_parts_drop() {
        let msg = ChatMessage {
            role: Role::User,
            content: Some(MessageContent::Parts(vec![MessagePart::Text {
                text: String::new(),
            }])),
            tool_calls: None,
            function_call: None,
            reasoning_content: None,
            tool_call_id: None,
        };
        let out = sanitize(&[msg]);
        assert!(out[0].content.is_none());
    }

    #[test]
    fn sanitize_is_idempotent() {
        let msg = ChatMessage::user("hi there");
        let once = sanitize(&[msg.clone()]);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn clone_message_is_independent_of_original() {
        let original = ChatMessage::user("hi");
        let mut copy = clone_message(&original);
        copy.content = Some(MessageContent::Text("changed".to_string()));
        assert_eq!(original.text(), "hi");
        assert_eq!(copy.text(), "changed");
    }

    #[test]
    fn empty_tool_calls_array_is_cleared() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: Some(MessageContent::Text("ok".into())),
            tool_calls: Some(vec![]),
            function_call: None,
            reasoning_content: None,
            tool_call_id: None,
        };
        let out = sanitize(&[msg]);
        assert!(out[0].tool_calls.is_none());
    }
}
