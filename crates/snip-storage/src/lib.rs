//! Repository implementations.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::{PostgresRepository, DEDUP_KEY_CONSTRAINT, SHORT_CODE_CONSTRAINT};

pub use snip_core::repository::Result;
pub use snip_core::{StorageError, UrlRepository};
