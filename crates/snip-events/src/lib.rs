//! Event sink implementations.
//!
//! Every sink publishes the same [`EventEnvelope`]; they differ only in where
//! it ends up.

pub mod envelope;
pub mod log;
pub mod recording;
pub mod redis;

pub use envelope::{EventEnvelope, EventKind};
pub use self::log::TracingEventSink;
pub use recording::RecordingEventSink;
pub use self::redis::RedisStreamEventSink;

pub use snip_core::events::Result;
pub use snip_core::{EventError, EventSink};
