//! The URL shortening orchestrator.
//!
//! [`ShortenerService`] composes a repository, a cache, a generator, a
//! validator and an event sink into the create / resolve / redirect / update /
//! delete flows.

pub mod clicks;
pub mod config;
pub mod error;
pub mod service;
pub mod shortener;
pub mod validator;

pub use clicks::{ClickHandler, ClickJob, ClickRecorder, ClickRecorderSettings};
pub use config::ShortenerConfig;
pub use error::{Result, ShortenerError, ValidationError};
pub use service::ShortenerService;
pub use shortener::Shortener;
pub use validator::{DefaultValidator, UrlValidator};
