use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use snip_core::cache::Result;
use snip_core::{DedupKey, ResponseCache, ShortCode, UrlCache, UrlEntity, UrlResponse};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

/// A cached value together with the TTL it was written with.
#[derive(Debug, Clone)]
struct Timed<V> {
    value: V,
    ttl: Duration,
}

/// Expires every entry after the TTL supplied on its most recent write.
struct PerEntryTtl;

impl<K, V> Expiry<K, Timed<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &Timed<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &Timed<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// An in-memory cache implementation using Moka.
///
/// Holds both keyspaces in separate bounded caches. It is the default for
/// single-node deployments and the L1 of a [`LayeredCache`](crate::LayeredCache).
#[derive(Debug, Clone)]
pub struct MokaUrlCache {
    entities: Cache<String, Timed<UrlEntity>>,
    responses: Cache<String, Timed<UrlResponse>>,
}

/// Configuration for creating a [`MokaUrlCache`] with custom settings.
#[derive(Debug, Clone, TypedBuilder)]
pub struct MokaCacheConfig {
    /// Maximum number of entities held.
    #[builder(default = 10_000)]
    max_entities: u64,
    /// Maximum number of create responses held.
    #[builder(default = 10_000)]
    max_responses: u64,
}

impl Default for MokaCacheConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MokaUrlCache {
    /// Creates a cache holding up to 10,000 entries per keyspace.
    pub fn new() -> Self {
        MokaCacheConfig::default().into()
    }

    /// Creates a cache holding up to `max_capacity` entries per keyspace.
    pub fn with_capacity(max_capacity: u64) -> Self {
        MokaCacheConfig::builder()
            .max_entities(max_capacity)
            .max_responses(max_capacity)
            .build()
            .into()
    }

    /// Returns a builder for creating a custom cache configuration.
    pub fn builder() -> MokaCacheConfigBuilder {
        MokaCacheConfig::builder()
    }

    /// Applies pending evictions; mostly useful for tests asserting sizes.
    pub async fn run_pending_tasks(&self) {
        self.entities.run_pending_tasks().await;
        self.responses.run_pending_tasks().await;
    }
}

impl Default for MokaUrlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl From<MokaCacheConfig> for MokaUrlCache {
    fn from(config: MokaCacheConfig) -> Self {
        MokaUrlCache {
            entities: Cache::builder()
                .max_capacity(config.max_entities)
                .expire_after(PerEntryTtl)
                .build(),
            responses: Cache::builder()
                .max_capacity(config.max_responses)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

#[async_trait]
impl UrlCache for MokaUrlCache {
    async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        trace!(code = %code, "Fetching URL entity from Moka cache");

        match self.entities.get(code.as_str()).await {
            Some(entry) => {
                debug!(code = %code, "Cache hit in Moka");
                Ok(Some(entry.value))
            }
            None => {
                trace!(code = %code, "Cache miss in Moka");
                Ok(None)
            }
        }
    }

    async fn set_url(&self, code: &ShortCode, entity: &UrlEntity, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            self.entities.invalidate(code.as_str()).await;
            return Ok(());
        }

        trace!(code = %code, ttl_ms = ttl.as_millis() as u64, "Storing URL entity in Moka cache");
        let entry = Timed {
            value: entity.clone(),
            ttl,
        };
        self.entities.insert(code.as_str().to_string(), entry).await;
        debug!(code = %code, "Cached entity in Moka");
        Ok(())
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        trace!(code = %code, "Removing URL entity from Moka cache");
        self.entities.invalidate(code.as_str()).await;
        debug!(code = %code, "Removed entity from Moka cache (if present)");
        Ok(())
    }

    async fn invalidate(&self, prefix: &str) -> Result<()> {
        let keys: Vec<_> = self
            .entities
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        for key in &keys {
            self.entities.invalidate(key.as_str()).await;
        }
        debug!(prefix, removed = keys.len(), "Invalidated Moka entries by prefix");
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for MokaUrlCache {
    async fn get_response(&self, key: &DedupKey) -> Result<Option<UrlResponse>> {
        match self.responses.get(key.as_str()).await {
            Some(entry) => {
                debug!(key = %key, "Response cache hit in Moka");
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    async fn set_response(
        &self,
        key: &DedupKey,
        response: &UrlResponse,
        ttl: Duration,
    ) -> Result<()> {
        if ttl.is_zero() {
            self.responses.invalidate(key.as_str()).await;
            return Ok(());
        }

        let entry = Timed {
            value: response.clone(),
            ttl,
        };
        self.responses.insert(key.as_str().to_string(), entry).await;
        trace!(key = %key, "Cached response in Moka");
        Ok(())
    }

    async fn del_response(&self, key: &DedupKey) -> Result<()> {
        self.responses.invalidate(key.as_str()).await;
        Ok(())
    }
}
