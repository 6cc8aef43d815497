//! Core types and traits for the snip URL shortener.
//!
//! This crate holds the domain model and the seams the orchestrator composes:
//! the repository, the two cache keyspaces and the event sink.

pub mod cache;
pub mod dedup;
pub mod entity;
pub mod error;
pub mod events;
pub mod model;
pub mod repository;
pub mod shortcode;

pub use cache::{ResponseCache, UrlCache};
pub use dedup::DedupKey;
pub use entity::{Metadata, NewUrl, UrlEntity};
pub use error::{
    CacheError, ConstraintKind, ConstraintViolation, CoreError, EventError, GenerationError,
    StorageError,
};
pub use events::EventSink;
pub use model::{ClickContext, ClickEvent, CreateUrlRequest, UpdateUrlRequest, UrlResponse};
pub use repository::UrlRepository;
pub use shortcode::ShortCode;
