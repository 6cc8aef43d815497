use async_trait::async_trait;
use jiff::Timestamp;
use snip_core::cache::Result;
use snip_core::{DedupKey, ResponseCache, ShortCode, UrlCache, UrlEntity, UrlResponse};
use std::time::Duration;
use tracing::{debug, trace};

/// A multi-layer cache that composes two cache implementations.
///
/// L1 is typically a fast, local cache (Moka) and L2 a slower, shared one
/// (Redis).
///
/// # Operation Strategy
///
/// - **Get**: Try L1 first, then L2. An L2 hit is backfilled into L1.
/// - **Set**: Write to L2, then L1.
/// - **Delete / invalidate**: Remove from L1, then L2.
///
/// L2 does not report remaining TTLs, so backfilled entries live in L1 for at
/// most `backfill_ttl`. Entities are additionally capped at their own expiry.
#[derive(Debug, Clone)]
pub struct LayeredCache<L1, L2> {
    l1: L1,
    l2: L2,
    backfill_ttl: Duration,
}

impl<L1, L2> LayeredCache<L1, L2> {
    pub const DEFAULT_BACKFILL_TTL: Duration = Duration::from_secs(60);

    /// Creates a new layered cache with the given L1 and L2 caches.
    pub fn new(l1: L1, l2: L2) -> Self {
        Self {
            l1,
            l2,
            backfill_ttl: Self::DEFAULT_BACKFILL_TTL,
        }
    }

    /// Overrides how long entries copied from L2 stay in L1.
    pub fn with_backfill_ttl(mut self, backfill_ttl: Duration) -> Self {
        self.backfill_ttl = backfill_ttl;
        self
    }

    /// Returns a reference to the L1 cache.
    pub fn l1(&self) -> &L1 {
        &self.l1
    }

    /// Returns a reference to the L2 cache.
    pub fn l2(&self) -> &L2 {
        &self.l2
    }

    /// Consumes the layered cache and returns the inner caches.
    pub fn into_inner(self) -> (L1, L2) {
        (self.l1, self.l2)
    }
}

#[async_trait]
impl<L1, L2> UrlCache for LayeredCache<L1, L2>
where
    L1: UrlCache,
    L2: UrlCache,
{
    async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        trace!(code = %code, "Fetching URL entity from layered cache");

        if let Some(entity) = self.l1.get_url(code).await? {
            debug!(code = %code, "L1 cache hit");
            return Ok(Some(entity));
        }
        trace!(code = %code, "L1 cache miss, trying L2");

        match self.l2.get_url(code).await? {
            Some(entity) => {
                debug!(code = %code, "L2 cache hit, backfilling L1");
                let ttl = entity.cache_ttl_at(Timestamp::now(), self.backfill_ttl);
                self.l1
                    .set_url(code, &entity, ttl.min(self.backfill_ttl))
                    .await?;
                Ok(Some(entity))
            }
            None => {
                trace!(code = %code, "L2 cache miss");
                Ok(None)
            }
        }
    }

    async fn set_url(&self, code: &ShortCode, entity: &UrlEntity, ttl: Duration) -> Result<()> {
        trace!(code = %code, "Storing URL entity in layered cache");

        self.l2.set_url(code, entity, ttl).await?;
        self.l1.set_url(code, entity, ttl).await?;
        debug!(code = %code, "Stored in L1 and L2 caches");

        Ok(())
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        trace!(code = %code, "Removing URL entity from layered cache");

        self.l1.del(code).await?;
        self.l2.del(code).await?;
        debug!(code = %code, "Removed from L1 and L2 caches");

        Ok(())
    }

    async fn invalidate(&self, prefix: &str) -> Result<()> {
        self.l1.invalidate(prefix).await?;
        self.l2.invalidate(prefix).await
    }
}

#[async_trait]
impl<L1, L2> ResponseCache for LayeredCache<L1, L2>
where
    L1: ResponseCache,
    L2: ResponseCache,
{
    async fn get_response(&self, key: &DedupKey) -> Result<Option<UrlResponse>> {
        if let Some(response) = self.l1.get_response(key).await? {
            return Ok(Some(response));
        }

        match self.l2.get_response(key).await? {
            Some(response) => {
                debug!(key = %key, "L2 response hit, backfilling L1");
                self.l1
                    .set_response(key, &response, self.backfill_ttl)
                    .await?;
                Ok(Some(response))
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
        self.l2.set_response(key, response, ttl).await?;
        self.l1.set_response(key, response, ttl).await
    }

    async fn del_response(&self, key: &DedupKey) -> Result<()> {
        self.l1.del_response(key).await?;
        self.l2.del_response(key).await
    }
}
