//! Versioned event envelope shared between the run core and any HTTP layer.
//!
//! This crate defines the wire shape of one run event and its SSE framing.
//! It does not depend on `runtime-core`; the core constructs `RunEvent` values
//! and this crate only knows how to serialize and frame them.

pub mod envelope;
pub mod event;

pub use envelope::{connected_frame, done_frame, ping_frame, run_event_frame};
pub use event::{EventPayload, Redaction, RunEvent};
