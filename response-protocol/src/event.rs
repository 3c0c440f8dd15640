//! Client-facing streaming response events: wire shape for one SSE frame (type + payload).
//! Sequence numbers and response ids are applied separately by [`crate::envelope`].

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

/// One frame of the client-facing response stream.
///
/// Internally tagged on `type` with the dotted event name used on the wire, mirroring the
/// upstream `response.*` event family (a response passes through `created` → `in_progress` →
/// per-item/part/delta events → `completed`, or `error` at any point).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ResponseEvent {
    #[serde(rename = "response.created")]
    Created { response: Value },

    #[serde(rename = "response.in_progress")]
    InProgress { id: String, status: String },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: Value },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: Value,
    },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
        obfuscation: String,
    },

    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },

    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: Value,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: usize, item: Value },

    #[serde(rename = "response.reasoning_summary_part.added")]
    ReasoningSummaryPartAdded {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        part: Value,
    },

    #[serde(rename = "response.reasoning_summary_part.delta")]
    ReasoningSummaryPartDelta {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        delta: String,
    },

    #[serde(rename = "response.reasoning_summary_part.done")]
    ReasoningSummaryPartDone {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        part: Value,
    },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        delta: String,
    },

    #[serde(rename = "response.reasoning_summary_text.done")]
    ReasoningSummaryTextDone {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        text: String,
    },

    #[serde(rename = "response.output_function_calls.delta")]
    OutputFunctionCallsDelta { item_id: String, delta: Value },

    #[serde(rename = "response.completed")]
    Completed { response: Value },

    #[serde(rename = "response.error")]
    Error {
        code: String,
        message: String,
        response_id: Option<String>,
    },
}

impl ResponseEvent {
    /// Serializes this event to a JSON object (type + payload only; no sequence number yet).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The dotted event name, for use as the SSE `event:` line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "response.created",
            Self::InProgress { .. } => "response.in_progress",
            Self::OutputItemAdded { .. } => "response.output_item.added",
            Self::ContentPartAdded { .. } => "response.content_part.added",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::OutputTextDone { .. } => "response.output_text.done",
            Self::ContentPartDone { .. } => "response.content_part.done",
            Self::OutputItemDone { .. } => "response.output_item.done",
            Self::ReasoningSummaryPartAdded { .. } => "response.reasoning_summary_part.added",
            Self::ReasoningSummaryPartDelta { .. } => "response.reasoning_summary_part.delta",
            Self::ReasoningSummaryPartDone { .. } => "response.reasoning_summary_part.done",
            Self::ReasoningSummaryTextDelta { .. } => "response.reasoning_summary_text.delta",
            Self::ReasoningSummaryTextDone { .. } => "response.reasoning_summary_text.done",
            Self::OutputFunctionCallsDelta { .. } => "response.output_function_calls.delta",
            Self::Completed { .. } => "response.completed",
            Self::Error { .. } => "response.error",
        }
    }
}

/// A short random hex tag attached to text-delta events for client-side de-duplication.
/// Non-semantic; a client may discard it.
pub fn random_obfuscation() -> String {
    let mut rng = rand::thread_rng();
    (0..4).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_serializes_with_dotted_type() {
        let ev = ResponseEvent::Created {
            response: serde_json::json!({"id": "resp_1"}),
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "response.created");
        assert_eq!(v["response"]["id"], "resp_1");
        assert_eq!(ev.name(), "response.created");
    }

    #[test]
    fn output_text_delta_carries_obfuscation() {
        let ev = ResponseEvent::OutputTextDelta {
            item_id: "item_1".into(),
            output_index: 0,
            content_index: 0,
            delta: "hello world".into(),
            obfuscation: random_obfuscation(),
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "response.output_text.delta");
        assert_eq!(v["delta"], "hello world");
        assert!(v["obfuscation"].as_str().unwrap().len() == 4);
    }

    #[test]
    fn error_event_carries_response_id() {
        let ev = ResponseEvent::Error {
            code: "deadline_exceeded".into(),
            message: "upstream timed out".into(),
            response_id: Some("resp_1".into()),
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "response.error");
        assert_eq!(v["response_id"], "resp_1");
    }

    #[test]
    fn random_obfuscation_is_hex() {
        let s = random_obfuscation();
        assert_eq!(s.len(), 4);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
