//! Client-facing response streaming protocol: event taxonomy + sequencing envelope.
//!
//! This crate defines the wire shape of a single SSE frame and how a response's event stream
//! is sequenced. It has no dependency on the gateway's domain model; `gateway-core`'s stream
//! bridge builds [`ResponseEvent`] values and calls [`to_json`] to frame them for the wire.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, SequenceState};
pub use event::{random_obfuscation, ResponseEvent};
