//! Envelope (response_id, sequence_number) stamped onto every outgoing frame.
//!
//! `SequenceState` owns the monotonic counter for one response's event stream; every event,
//! regardless of kind, draws its `sequence_number` from the same counter, so ordering across
//! text, reasoning, and function-call events is total.

use crate::event::ResponseEvent;
use serde_json::Value;

/// Envelope fields merged into every frame.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    pub response_id: Option<String>,
    pub sequence_number: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_id(mut self, id: impl Into<String>) -> Self {
        self.response_id = Some(id.into());
        self
    }

    pub fn with_sequence_number(mut self, seq: u64) -> Self {
        self.sequence_number = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object. Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.response_id {
            obj.entry("response_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(seq) = self.sequence_number {
            obj.entry("sequence_number")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Per-response sequencing state: one counter shared by every event kind in the stream.
pub struct SequenceState {
    pub response_id: String,
    pub next_sequence: u64,
}

impl SequenceState {
    pub fn new(response_id: String) -> Self {
        Self {
            response_id,
            next_sequence: 0,
        }
    }

    /// Injects the envelope into the event value and advances the counter.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_response_id(self.response_id.clone())
            .with_sequence_number(self.next_sequence);
        self.next_sequence += 1;
        env.inject_into(value);
    }
}

/// Converts a response event to JSON and stamps it with the next sequence number.
pub fn to_json(event: &ResponseEvent, state: &mut SequenceState) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ResponseEvent;

    #[test]
    fn envelope_inject_does_not_overwrite() {
        let mut obj = serde_json::json!({"type":"response.created","response_id":"keep-me"});
        let env = Envelope::new()
            .with_response_id("resp_override")
            .with_sequence_number(0);
        env.inject_into(&mut obj);
        assert_eq!(obj["response_id"], "keep-me");
        assert_eq!(obj["sequence_number"], 0);
    }

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let mut state = SequenceState::new("resp_1".to_string());
        let ev = ResponseEvent::InProgress {
            id: "resp_1".into(),
            status: "in_progress".into(),
        };
        let first = to_json(&ev, &mut state).unwrap();
        let second = to_json(&ev, &mut state).unwrap();
        assert_eq!(first["sequence_number"], 0);
        assert_eq!(second["sequence_number"], 1);
        assert_eq!(first["response_id"], "resp_1");
    }
}
