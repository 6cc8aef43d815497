use crate::error::Result;
use crate::service::ShortenerService;
use async_trait::async_trait;
use snip_core::{
    ClickContext, CreateUrlRequest, ResponseCache, ShortCode, UpdateUrlRequest, UrlCache,
    UrlEntity, UrlRepository, UrlResponse,
};
use snip_generator::Generator;
use std::time::Duration;

/// The operations a transport exposes, independent of the backends behind them.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens a URL, or returns the owner's existing short URL for it.
    async fn create_url(&self, request: CreateUrlRequest) -> Result<UrlResponse>;

    /// Retrieves the live entity for a short code.
    async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>>;

    /// Resolves a short code to its target and records the click.
    async fn redirect(&self, code: &ShortCode, context: ClickContext) -> Result<Option<String>>;

    async fn update_url(&self, code: &ShortCode, request: UpdateUrlRequest)
        -> Result<UrlResponse>;

    async fn delete_url(&self, code: &ShortCode) -> Result<()>;

    async fn list_urls(&self, owner_id: i64, limit: i64, offset: i64) -> Result<Vec<UrlResponse>>;

    async fn validate_url(&self, url: &str) -> Result<()>;

    async fn shutdown(&self, grace: Duration);
}

#[async_trait]
impl<R, C, G> Shortener for ShortenerService<R, C, G>
where
    R: UrlRepository,
    C: UrlCache + ResponseCache,
    G: Generator,
{
    async fn create_url(&self, request: CreateUrlRequest) -> Result<UrlResponse> {
        ShortenerService::create_url(self, request).await
    }

    async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        ShortenerService::get_url(self, code).await
    }

    async fn redirect(&self, code: &ShortCode, context: ClickContext) -> Result<Option<String>> {
        ShortenerService::redirect(self, code, context).await
    }

    async fn update_url(
        &self,
        code: &ShortCode,
        request: UpdateUrlRequest,
    ) -> Result<UrlResponse> {
        ShortenerService::update_url(self, code, request).await
    }

    async fn delete_url(&self, code: &ShortCode) -> Result<()> {
        ShortenerService::delete_url(self, code).await
    }

    async fn list_urls(&self, owner_id: i64, limit: i64, offset: i64) -> Result<Vec<UrlResponse>> {
        ShortenerService::list_urls(self, owner_id, limit, offset).await
    }

    async fn validate_url(&self, url: &str) -> Result<()> {
        ShortenerService::validate_url(self, url).await
    }

    async fn shutdown(&self, grace: Duration) {
        ShortenerService::shutdown(self, grace).await
    }
}
