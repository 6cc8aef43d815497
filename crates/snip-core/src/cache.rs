use crate::dedup::DedupKey;
use crate::entity::UrlEntity;
use crate::error::CacheError;
use crate::model::UrlResponse;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use std::time::Duration;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The entity keyspace: short code to full [`UrlEntity`].
///
/// Read-through, write-around, never a source of truth. Callers treat every
/// error as a miss.
#[async_trait]
pub trait UrlCache: Send + Sync + 'static {
    /// Get URL entity from cache.
    ///
    /// Returns `Ok(None)` if the key is not in the cache.
    async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>>;

    /// Store URL entity in cache for `ttl`.
    async fn set_url(&self, code: &ShortCode, entity: &UrlEntity, ttl: Duration) -> Result<()>;

    /// Remove URL entity from cache.
    ///
    /// It is not an error if the key does not exist.
    async fn del(&self, code: &ShortCode) -> Result<()>;

    /// Remove every entity whose short code starts with `prefix`.
    async fn invalidate(&self, prefix: &str) -> Result<()>;
}

/// The response keyspace: dedup key to an already-built [`UrlResponse`].
#[async_trait]
pub trait ResponseCache: Send + Sync + 'static {
    async fn get_response(&self, key: &DedupKey) -> Result<Option<UrlResponse>>;

    async fn set_response(
        &self,
        key: &DedupKey,
        response: &UrlResponse,
        ttl: Duration,
    ) -> Result<()>;

    async fn del_response(&self, key: &DedupKey) -> Result<()>;
}
