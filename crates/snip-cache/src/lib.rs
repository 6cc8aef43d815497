//! Cache implementations for the entity and response keyspaces.

pub mod layered;
pub mod moka;
pub mod redis;

pub use layered::LayeredCache;
pub use self::moka::{MokaCacheConfig, MokaUrlCache};
pub use self::redis::RedisUrlCache;

pub use snip_core::cache::Result;
pub use snip_core::{CacheError, ResponseCache, UrlCache};
