//! StreamBridge: turns upstream `StreamDelta` fragments into the client-facing typed SSE
//! event sequence.
//!
//! The bridge owns per-item accumulators (text, reasoning, function/tool calls) and the
//! buffering policy that decides when a text or reasoning delta is actually worth emitting
//! to the client, versus held back to await more content. It does not know about
//! `response.created` / `response.completed` — those bracket a whole response and are the
//! `ResponseEngine`'s concern; the bridge only emits `response.in_progress` and the
//! per-output-item event family.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::llm::StreamDelta;
use response_protocol::{random_obfuscation, to_json, ResponseEvent, SequenceState};

pub const DEFAULT_FLUSH_WORD_COUNT: usize = 6;

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[derive(Default)]
struct BridgeState {
    item_id: Option<String>,
    item_added: bool,

    reasoning_part_added: bool,
    reasoning_done: bool,
    reasoning_buffer: String,
    reasoning_full: String,

    text_part_added: bool,
    text_done: bool,
    text_buffer: String,
    text_full: String,
}

/// Bridges a channel of `StreamDelta` fragments into typed, sequence-numbered SSE frames.
pub struct StreamBridge {
    flush_word_count: usize,
}

impl Default for StreamBridge {
    fn default() -> Self {
        Self {
            flush_word_count: DEFAULT_FLUSH_WORD_COUNT,
        }
    }
}

impl StreamBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_word_count(flush_word_count: usize) -> Self {
        Self { flush_word_count }
    }

    /// Drains `deltas` until the channel closes, emitting typed events through `out_tx` via
    /// `seq`. Returns once every accumulator has been flushed and closed out.
    pub async fn run(
        &self,
        mut deltas: mpsc::Receiver<StreamDelta>,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        let mut state = BridgeState::default();
        let mut in_progress_sent = false;

        while let Some(delta) = deltas.recv().await {
            if !in_progress_sent {
                self.emit(
                    seq,
                    out_tx,
                    ResponseEvent::InProgress {
                        id: seq.response_id.clone(),
                        status: "in_progress".to_string(),
                    },
                )
                .await?;
                in_progress_sent = true;
            }

            match delta {
                StreamDelta::Reasoning(text) => self.handle_reasoning(&mut state, text, seq, out_tx).await?,
                StreamDelta::Text(text) => self.handle_text(&mut state, text, seq, out_tx).await?,
                StreamDelta::FunctionCall { name, arguments_delta } => {
                    self.ensure_item_added(&mut state, seq, out_tx).await?;
                    self.emit(
                        seq,
                        out_tx,
                        ResponseEvent::OutputFunctionCallsDelta {
                            item_id: state.item_id.clone().expect("item added"),
                            delta: serde_json::json!({"name": name, "arguments": arguments_delta}),
                        },
                    )
                    .await?;
                }
                StreamDelta::ToolCall {
                    index,
                    id,
                    name,
                    arguments_delta,
                } => {
                    self.ensure_item_added(&mut state, seq, out_tx).await?;
                    self.emit(
                        seq,
                        out_tx,
                        ResponseEvent::OutputFunctionCallsDelta {
                            item_id: state.item_id.clone().expect("item added"),
                            delta: serde_json::json!({
                                "index": index,
                                "id": id,
                                "name": name,
                                "arguments": arguments_delta,
                            }),
                        },
                    )
                    .await?;
                }
                StreamDelta::Usage(_) => {}
            }
        }

        self.finish(&mut state, seq, out_tx).await
    }

    async fn ensure_item_added(
        &self,
        state: &mut BridgeState,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        if state.item_added {
            return Ok(());
        }
        let item_id = format!("item_{}", Uuid::new_v4());
        self.emit(
            seq,
            out_tx,
            ResponseEvent::OutputItemAdded {
                output_index: 0,
                item: serde_json::json!({
                    "id": item_id,
                    "type": "message",
                    "status": "in_progress",
                    "role": "assistant",
                    "content": [],
                }),
            },
        )
        .await?;
        state.item_id = Some(item_id);
        state.item_added = true;
        Ok(())
    }

    async fn finalize_reasoning(
        &self,
        state: &mut BridgeState,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        if state.reasoning_done || !state.reasoning_part_added {
            state.reasoning_done = true;
            return Ok(());
        }
        if !state.reasoning_buffer.is_empty() {
            self.flush_reasoning_delta(state, seq, out_tx).await?;
        }
        let item_id = state.item_id.clone().expect("item added");
        self.emit(
            seq,
            out_tx,
            ResponseEvent::ReasoningSummaryTextDone {
                item_id: item_id.clone(),
                output_index: 0,
                summary_index: 0,
                text: state.reasoning_full.clone(),
            },
        )
        .await?;
        self.emit(
            seq,
            out_tx,
            ResponseEvent::ReasoningSummaryPartDone {
                item_id,
                output_index: 0,
                summary_index: 0,
                part: serde_json::json!({"type": "summary_text", "text": state.reasoning_full}),
            },
        )
        .await?;
        state.reasoning_done = true;
        Ok(())
    }

    async fn flush_reasoning_delta(
        &self,
        state: &mut BridgeState,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        let item_id = state.item_id.clone().expect("item added");
        if !state.reasoning_part_added {
            self.emit(
                seq,
                out_tx,
                ResponseEvent::ReasoningSummaryPartAdded {
                    item_id: item_id.clone(),
                    output_index: 0,
                    summary_index: 0,
                    part: serde_json::json!({"type": "summary_text", "text": ""}),
                },
            )
            .await?;
            state.reasoning_part_added = true;
        }
        let delta = std::mem::take(&mut state.reasoning_buffer);
        self.emit(
            seq,
            out_tx,
            ResponseEvent::ReasoningSummaryTextDelta {
                item_id,
                output_index: 0,
                summary_index: 0,
                delta,
            },
        )
        .await
    }

    async fn handle_reasoning(
        &self,
        state: &mut BridgeState,
        text: String,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        self.ensure_item_added(state, seq, out_tx).await?;
        state.reasoning_buffer.push_str(&text);
        state.reasoning_full.push_str(&text);
        if word_count(&state.reasoning_buffer) >= self.flush_word_count {
            self.flush_reasoning_delta(state, seq, out_tx).await?;
        }
        Ok(())
    }

    async fn flush_text_delta(
        &self,
        state: &mut BridgeState,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        let item_id = state.item_id.clone().expect("item added");
        if !state.text_part_added {
            self.emit(
                seq,
                out_tx,
                ResponseEvent::ContentPartAdded {
                    item_id: item_id.clone(),
                    output_index: 0,
                    content_index: 0,
                    part: serde_json::json!({"type": "output_text", "text": ""}),
                },
            )
            .await?;
            state.text_part_added = true;
        }
        let delta = std::mem::take(&mut state.text_buffer);
        self.emit(
            seq,
            out_tx,
            ResponseEvent::OutputTextDelta {
                item_id,
                output_index: 0,
                content_index: 0,
                delta,
                obfuscation: random_obfuscation(),
            },
        )
        .await
    }

    async fn handle_text(
        &self,
        state: &mut BridgeState,
        text: String,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        self.ensure_item_added(state, seq, out_tx).await?;
        // Reasoning, if any, always closes out before text starts flowing.
        self.finalize_reasoning(state, seq, out_tx).await?;

        state.text_buffer.push_str(&text);
        state.text_full.push_str(&text);
        if word_count(&state.text_buffer) >= self.flush_word_count {
            self.flush_text_delta(state, seq, out_tx).await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        state: &mut BridgeState,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
    ) -> Result<(), GatewayError> {
        if !state.item_added {
            return Ok(());
        }
        self.finalize_reasoning(state, seq, out_tx).await?;

        if !state.text_buffer.is_empty() {
            self.flush_text_delta(state, seq, out_tx).await?;
        }
        let item_id = state.item_id.clone().expect("item added");
        if state.text_part_added {
            self.emit(
                seq,
                out_tx,
                ResponseEvent::OutputTextDone {
                    item_id: item_id.clone(),
                    output_index: 0,
                    content_index: 0,
                    text: state.text_full.clone(),
                },
            )
            .await?;
            self.emit(
                seq,
                out_tx,
                ResponseEvent::ContentPartDone {
                    item_id: item_id.clone(),
                    output_index: 0,
                    content_index: 0,
                    part: serde_json::json!({"type": "output_text", "text": state.text_full}),
                },
            )
            .await?;
        }
        self.emit(
            seq,
            out_tx,
            ResponseEvent::OutputItemDone {
                output_index: 0,
                item: serde_json::json!({
                    "id": item_id,
                    "type": "message",
                    "status": "completed",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": state.text_full}],
                }),
            },
        )
        .await
    }

    async fn emit(
        &self,
        seq: &mut SequenceState,
        out_tx: &mpsc::Sender<serde_json::Value>,
        event: ResponseEvent,
    ) -> Result<(), GatewayError> {
        let value = to_json(&event, seq)
            .map_err(|e| GatewayError::external(format!("failed to encode event: {}", e)))?;
        out_tx
            .send(value)
            .await
            .map_err(|_| GatewayError::cancelled("client disconnected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_names(values: &[serde_json::Value]) -> Vec<String> {
        values
            .iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect()
    }

    async fn drain(mut rx: mpsc::Receiver<serde_json::Value>) -> Vec<serde_json::Value> {
        let mut out = vec![];
        while let Some(v) = rx.recv().await {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn text_delta_is_buffered_until_flush_word_count() {
        let bridge = StreamBridge::with_flush_word_count(3);
        let (delta_tx, delta_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(32);
        let mut seq = SequenceState::new("resp_1".into());

        delta_tx.send(StreamDelta::Text("one ".into())).await.unwrap();
        delta_tx.send(StreamDelta::Text("two ".into())).await.unwrap();
        delta_tx.send(StreamDelta::Text("three ".into())).await.unwrap();
        drop(delta_tx);

        bridge.run(delta_rx, &mut seq, &out_tx).await.unwrap();
        drop(out_tx);
        let events = drain(out_rx).await;
        let names = event_names(&events);

        assert_eq!(
            names,
            vec![
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
            ]
        );
        let delta_event = events
            .iter()
            .find(|e| e["type"] == "response.output_text.delta")
            .unwrap();
        assert_eq!(delta_event["delta"], "one two three ");
    }

    #[tokio::test]
    async fn reasoning_closes_before_text_starts() {
        let bridge = StreamBridge::with_flush_word_count(100);
        let (delta_tx, delta_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(32);
        let mut seq = SequenceState::new("resp_1".into());

        delta_tx
            .send(StreamDelta::Reasoning("thinking about it".into()))
            .await
            .unwrap();
        delta_tx.send(StreamDelta::Text("answer".into())).await.unwrap();
        drop(delta_tx);

        bridge.run(delta_rx, &mut seq, &out_tx).await.unwrap();
        drop(out_tx);
        let events = drain(out_rx).await;
        let names = event_names(&events);

        let reasoning_done_idx = names
            .iter()
            .position(|n| n == "response.reasoning_summary_text.done")
            .unwrap();
        let text_delta_idx = names
            .iter()
            .position(|n| n == "response.output_text.delta")
            .unwrap();
        assert!(reasoning_done_idx < text_delta_idx);
    }

    #[tokio::test]
    async fn sequence_numbers_are_strictly_increasing() {
        let bridge = StreamBridge::with_flush_word_count(1);
        let (delta_tx, delta_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(32);
        let mut seq = SequenceState::new("resp_1".into());

        delta_tx.send(StreamDelta::Text("hello world".into())).await.unwrap();
        drop(delta_tx);

        bridge.run(delta_rx, &mut seq, &out_tx).await.unwrap();
        drop(out_tx);
        let events = drain(out_rx).await;

        let mut last = -1i64;
        for event in &events {
            let n = event["sequence_number"].as_i64().unwrap();
            assert!(n > last, "sequence numbers must strictly increase");
            last = n;
        }
    }

    #[tokio::test]
    async fn function_call_delta_passes_through_immediately() {
        let bridge = StreamBridge::new();
        let (delta_tx, delta_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(32);
        let mut seq = SequenceState::new("resp_1".into());

        delta_tx
            .send(StreamDelta::FunctionCall {
                name: Some("get_weather".into()),
                arguments_delta: "{\"city\":".into(),
            })
            .await
            .unwrap();
        drop(delta_tx);

        bridge.run(delta_rx, &mut seq, &out_tx).await.unwrap();
        drop(out_tx);
        let events = drain(out_rx).await;
        let names = event_names(&events);
        assert!(names.contains(&"response.output_function_calls.delta".to_string()));
    }
}
