use crate::clicks::{ClickHandler, ClickJob, ClickRecorder, ClickRecorderSettings};
use crate::config::ShortenerConfig;
use crate::error::{Result, ShortenerError, ValidationError};
use crate::validator::UrlValidator;
use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use snip_core::{
    ClickContext, ClickEvent, CreateUrlRequest, DedupKey, EventSink, NewUrl, ResponseCache,
    ShortCode, UpdateUrlRequest, UrlCache, UrlEntity, UrlRepository, UrlResponse,
};
use snip_generator::Generator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// The creation / resolution orchestrator.
///
/// Holds no per-request state; one instance is shared by every request.
/// Uniqueness is decided by the repository alone. The cache is read-through
/// and write-around and never consulted for a durability decision.
pub struct ShortenerService<R, C, G> {
    repository: Arc<R>,
    cache: Arc<C>,
    generator: G,
    validator: Arc<dyn UrlValidator>,
    events: Arc<dyn EventSink>,
    clicks: ClickRecorder,
    config: ShortenerConfig,
}

impl<R, C, G> ShortenerService<R, C, G>
where
    R: UrlRepository,
    C: UrlCache + ResponseCache,
    G: Generator,
{
    /// Creates the service and starts its click workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        repository: R,
        cache: C,
        generator: G,
        validator: Arc<dyn UrlValidator>,
        events: Arc<dyn EventSink>,
        config: ShortenerConfig,
    ) -> Self {
        let repository = Arc::new(repository);
        let cache = Arc::new(cache);

        let accounting = ClickAccounting {
            repository: Arc::clone(&repository),
            cache: Arc::clone(&cache),
            events: Arc::clone(&events),
            default_entity_ttl: config.default_entity_ttl,
        };
        let clicks = ClickRecorder::start(
            Arc::new(accounting),
            ClickRecorderSettings {
                workers: config.click_workers,
                capacity: config.click_queue_capacity,
                enqueue_timeout: config.click_enqueue_timeout,
                job_timeout: config.click_timeout,
            },
        );

        Self {
            repository,
            cache,
            generator,
            validator,
            events,
            clicks,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn config(&self) -> &ShortenerConfig {
        &self.config
    }

    pub fn clicks(&self) -> &ClickRecorder {
        &self.clicks
    }

    /// Shortens a URL for an owner, returning the existing short URL if the
    /// owner already has a live one for the same address.
    pub async fn create_url(&self, request: CreateUrlRequest) -> Result<UrlResponse> {
        let request = CreateUrlRequest {
            url: request.url.trim().to_string(),
            ..request
        };
        if request.owner_id <= 0 {
            return Err(ValidationError::InvalidOwner(request.owner_id).into());
        }
        let dedup_key = DedupKey::new(&request.url, request.owner_id);

        match self.cache.get_response(&dedup_key).await {
            Ok(Some(response)) => {
                debug!(
                    owner_id = request.owner_id,
                    code = %response.short_code,
                    "Response cache hit"
                );
                return Ok(response);
            }
            Ok(None) => trace!(owner_id = request.owner_id, "Response cache miss"),
            Err(e) => warn!(error = %e, "Response cache lookup failed"),
        }

        self.validate_url(&request.url).await?;

        let now = Timestamp::now();
        let expires_at = match request.expires_in_seconds {
            Some(seconds) => expiry_after(now, seconds)?,
            None => None,
        };

        let existing = self
            .repository
            .get_by_owner_and_url(&request.url, request.owner_id)
            .await
            .map_err(ShortenerError::DedupCheck)?;

        let entity = match existing {
            Some(entity) => {
                debug!(
                    owner_id = request.owner_id,
                    code = %entity.short_code,
                    "Reusing live short url"
                );
                entity
            }
            None => {
                let (entity, created) = self.persist_new(&request, expires_at).await?;
                if created {
                    self.cache_entity(&entity).await;
                    if let Err(e) = self.events.publish_created(&entity).await {
                        warn!(
                            code = %entity.short_code,
                            error = %e,
                            "Failed to publish created event"
                        );
                    }
                }
                entity
            }
        };

        let response = UrlResponse::from_entity(&entity, &self.config.base_url);
        if let Err(e) = self
            .cache
            .set_response(&dedup_key, &response, self.config.response_ttl)
            .await
        {
            warn!(code = %response.short_code, error = %e, "Failed to cache response");
        }

        Ok(response)
    }

    /// Returns the live entity stored under `code`.
    pub async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        let now = Timestamp::now();

        match self.cache.get_url(code).await {
            Ok(Some(entity)) if entity.is_live_at(now) => {
                debug!(code = %code, "Entity cache hit");
                return Ok(Some(entity));
            }
            Ok(Some(_)) => {
                debug!(code = %code, "Cached entity is no longer live");
                if let Err(e) = self.cache.del(code).await {
                    warn!(code = %code, error = %e, "Failed to evict stale entity");
                }
                return Ok(None);
            }
            Ok(None) => trace!(code = %code, "Entity cache miss"),
            Err(e) => warn!(code = %code, error = %e, "Entity cache lookup failed"),
        }

        let entity = self
            .repository
            .get_by_short_code(code)
            .await
            .map_err(ShortenerError::Repository)?;

        match entity {
            Some(entity) if entity.is_live_at(now) => {
                self.cache_entity(&entity).await;
                Ok(Some(entity))
            }
            _ => Ok(None),
        }
    }

    /// Resolves `code` to its target and queues the click for accounting.
    ///
    /// Accounting happens on the click workers; a full queue drops the click.
    pub async fn redirect(
        &self,
        code: &ShortCode,
        context: ClickContext,
    ) -> Result<Option<String>> {
        let Some(entity) = self.get_url(code).await? else {
            return Ok(None);
        };

        let target = entity.original_url.clone();
        let event = ClickEvent::new(code.clone(), context);
        self.clicks.record(ClickJob { entity, event }).await;

        Ok(Some(target))
    }

    /// Soft-deletes the entity.
    ///
    /// Only the entity cache is evicted. A cached create response for the
    /// same owner and URL keeps being served until it expires.
    pub async fn delete_url(&self, code: &ShortCode) -> Result<()> {
        let deleted = self
            .repository
            .soft_delete(code)
            .await
            .map_err(ShortenerError::Repository)?;
        if !deleted {
            return Err(ShortenerError::NotFound(code.clone()));
        }

        if let Err(e) = self.cache.del(code).await {
            warn!(code = %code, error = %e, "Failed to evict deleted entity");
        }
        info!(code = %code, "Short url deleted");
        Ok(())
    }

    /// Changes the expiry and/or metadata of a live entity.
    pub async fn update_url(
        &self,
        code: &ShortCode,
        request: UpdateUrlRequest,
    ) -> Result<UrlResponse> {
        let now = Timestamp::now();
        let mut entity = self
            .repository
            .get_by_short_code(code)
            .await
            .map_err(ShortenerError::Repository)?
            .filter(|entity| entity.is_live_at(now))
            .ok_or_else(|| ShortenerError::NotFound(code.clone()))?;

        let mut changed = Vec::new();
        if let Some(seconds) = request.expires_in_seconds {
            entity.expires_at = expiry_after(now, seconds)?;
            changed.push("expires_at");
        }
        if let Some(metadata) = request.metadata {
            entity.metadata = Some(metadata);
            changed.push("metadata");
        }

        if changed.is_empty() {
            return Ok(UrlResponse::from_entity(&entity, &self.config.base_url));
        }

        let updated = self
            .repository
            .update(&entity)
            .await
            .map_err(ShortenerError::Repository)?;
        if !updated {
            return Err(ShortenerError::NotFound(code.clone()));
        }
        entity.updated_at = now;

        if let Err(e) = self.cache.del(code).await {
            warn!(code = %code, error = %e, "Failed to evict updated entity");
        }
        if let Err(e) = self.events.publish_updated(&entity, &changed).await {
            warn!(code = %code, error = %e, "Failed to publish updated event");
        }
        info!(code = %code, fields = ?changed, "Short url updated");

        Ok(UrlResponse::from_entity(&entity, &self.config.base_url))
    }

    /// Lists an owner's live short urls, newest first.
    pub async fn list_urls(
        &self,
        owner_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UrlResponse>> {
        if owner_id <= 0 {
            return Err(ValidationError::InvalidOwner(owner_id).into());
        }
        let (limit, offset) = self.config.page(limit, offset);

        let entities = self
            .repository
            .list_by_owner(owner_id, limit, offset)
            .await
            .map_err(ShortenerError::Repository)?;

        Ok(entities
            .iter()
            .map(|entity| UrlResponse::from_entity(entity, &self.config.base_url))
            .collect())
    }

    /// Runs the validator and the safety check without touching any store.
    pub async fn validate_url(&self, url: &str) -> Result<()> {
        self.validator.validate(url)?;
        if !self.validator.is_safe(url).await {
            return Err(ShortenerError::UnsafeUrl);
        }
        Ok(())
    }

    /// Stops click accounting, draining queued clicks for up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.clicks.shutdown(grace).await;
    }

    /// Generates and persists a new entity, retrying on short code collisions.
    ///
    /// The flag is `false` when a concurrent create for the same owner and
    /// URL won and its entity is returned instead.
    async fn persist_new(
        &self,
        request: &CreateUrlRequest,
        expires_at: Option<Timestamp>,
    ) -> Result<(UrlEntity, bool)> {
        let attempts = self.config.max_create_attempts.max(1);

        for attempt in 1..=attempts {
            let code = self.next_candidate().await?;
            let new_url = NewUrl::builder()
                .short_code(code.clone())
                .original_url(request.url.clone())
                .owner_id(request.owner_id)
                .expires_at(expires_at)
                .metadata(request.metadata.clone())
                .build();

            match self.repository.create(new_url).await {
                Ok(entity) => {
                    info!(
                        code = %entity.short_code,
                        owner_id = entity.owner_id,
                        attempt,
                        "Short url created"
                    );
                    return Ok((entity, true));
                }
                Err(e) if e.is_short_code_collision() => {
                    debug!(code = %code, attempt, "Short code collision, retrying");
                }
                Err(e) if e.is_dedup_key_collision() => {
                    debug!(owner_id = request.owner_id, "Lost create race, reading the winner");
                    return match self.fallback_read(request).await? {
                        Some(entity) => Ok((entity, false)),
                        None => Err(ShortenerError::Persist(e)),
                    };
                }
                Err(e) => return Err(ShortenerError::Persist(e)),
            }
        }

        match self.fallback_read(request).await? {
            Some(entity) => {
                debug!(
                    code = %entity.short_code,
                    "Create retries exhausted, found concurrent winner"
                );
                Ok((entity, false))
            }
            None => Err(ShortenerError::CreationExhausted { attempts }),
        }
    }

    /// Draws candidates until one is not yet in the store.
    ///
    /// The probes are advisory; the insert is the authority on uniqueness.
    async fn next_candidate(&self) -> Result<ShortCode> {
        let probes = self.config.uniqueness_probes;
        if probes == 0 {
            return Ok(self.generator.generate()?);
        }

        for probe in 1..=probes {
            let code = self.generator.generate()?;
            match self.repository.get_by_short_code(&code).await {
                Ok(None) => return Ok(code),
                Ok(Some(_)) => trace!(code = %code, probe, "Candidate already taken"),
                Err(e) => {
                    warn!(code = %code, error = %e, "Uniqueness probe failed, using candidate");
                    return Ok(code);
                }
            }
        }

        Err(ShortenerError::GenerationExhausted { probes })
    }

    async fn fallback_read(&self, request: &CreateUrlRequest) -> Result<Option<UrlEntity>> {
        self.repository
            .get_by_owner_and_url(&request.url, request.owner_id)
            .await
            .map_err(ShortenerError::DedupCheck)
    }

    async fn cache_entity(&self, entity: &UrlEntity) {
        let ttl = entity.cache_ttl_at(Timestamp::now(), self.config.default_entity_ttl);
        if ttl.is_zero() {
            return;
        }
        match self.cache.set_url(&entity.short_code, entity, ttl).await {
            Ok(()) => debug!(code = %entity.short_code, ttl_secs = ttl.as_secs(), "Entity cached"),
            Err(e) => warn!(code = %entity.short_code, error = %e, "Failed to cache entity"),
        }
    }
}

/// Turns a lifetime in seconds into an absolute expiry. Non-positive means never.
fn expiry_after(now: Timestamp, seconds: i64) -> Result<Option<Timestamp>> {
    if seconds <= 0 {
        return Ok(None);
    }
    now.checked_add(SignedDuration::from_secs(seconds))
        .map(Some)
        .map_err(|_| ValidationError::InvalidExpiry(seconds).into())
}

/// Per-click side effects run by the click workers.
struct ClickAccounting<R, C> {
    repository: Arc<R>,
    cache: Arc<C>,
    events: Arc<dyn EventSink>,
    default_entity_ttl: Duration,
}

#[async_trait]
impl<R, C> ClickHandler for ClickAccounting<R, C>
where
    R: UrlRepository,
    C: UrlCache,
{
    async fn handle(&self, job: ClickJob) {
        let ClickJob { mut entity, event } = job;
        let code = &event.short_code;

        let counted = match self.repository.increment_click_count(code).await {
            Ok(counted) => {
                if !counted {
                    debug!(code = %code, "Click target is gone, not counted");
                }
                counted
            }
            Err(e) => {
                error!(code = %code, error = %e, "Failed to increment click count");
                false
            }
        };

        if let Err(e) = self.events.publish_clicked(&event).await {
            warn!(code = %code, error = %e, "Failed to publish click event");
        }

        // Refreshing after a failed increment could resurrect a deleted entity.
        if !counted {
            return;
        }
        entity.click_count += 1;
        let ttl = entity.cache_ttl_at(Timestamp::now(), self.default_entity_ttl);
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = self.cache.set_url(code, &entity, ttl).await {
            warn!(code = %code, error = %e, "Failed to refresh cached entity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_cache::MokaUrlCache;
    use snip_core::{CacheError, StorageError};
    use snip_events::{EventKind, RecordingEventSink};
    use snip_generator::RandomGenerator;
    use snip_storage::InMemoryRepository;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::validator::DefaultValidator;

    const BASE_URL: &str = "https://sn.ip";

    fn code(value: &str) -> ShortCode {
        ShortCode::new_unchecked(value)
    }

    fn config() -> ShortenerConfig {
        ShortenerConfig::builder().base_url(BASE_URL).build()
    }

    fn service_with<R, C, G>(
        repository: R,
        cache: C,
        generator: G,
        config: ShortenerConfig,
    ) -> (ShortenerService<R, C, G>, RecordingEventSink)
    where
        R: UrlRepository,
        C: UrlCache + ResponseCache,
        G: Generator,
    {
        let events = RecordingEventSink::new();
        let service = ShortenerService::new(
            repository,
            cache,
            generator,
            Arc::new(DefaultValidator::new()),
            Arc::new(events.clone()),
            config,
        );
        (service, events)
    }

    type TestService = ShortenerService<InMemoryRepository, MokaUrlCache, RandomGenerator>;

    fn service() -> (TestService, RecordingEventSink) {
        service_with(
            InMemoryRepository::new(),
            MokaUrlCache::new(),
            RandomGenerator::new(7),
            config(),
        )
    }

    /// Hands out a fixed sequence of codes, repeating the last one.
    struct ScriptedGenerator {
        codes: parking_lot::Mutex<VecDeque<&'static str>>,
    }

    impl ScriptedGenerator {
        fn new(codes: &[&'static str]) -> Self {
            Self {
                codes: parking_lot::Mutex::new(codes.iter().copied().collect()),
            }
        }
    }

    impl Generator for ScriptedGenerator {
        fn generate(&self) -> std::result::Result<ShortCode, snip_core::GenerationError> {
            let mut codes = self.codes.lock();
            let next = if codes.len() > 1 {
                codes.pop_front()
            } else {
                codes.front().copied()
            };
            Ok(code(next.unwrap_or("fallback")))
        }
    }

    /// Delegates to an in-memory repository with injectable faults.
    #[derive(Default)]
    struct FaultyRepository {
        inner: InMemoryRepository,
        create_error: Option<StorageError>,
        dedup_error: Option<StorageError>,
        /// Inserted by a "concurrent caller" right before every create.
        race_winner: Option<&'static str>,
        create_calls: AtomicUsize,
    }

    #[async_trait]
    impl UrlRepository for FaultyRepository {
        async fn create(&self, url: NewUrl) -> snip_core::repository::Result<UrlEntity> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.create_error {
                return Err(err.clone());
            }
            if let Some(winner) = self.race_winner {
                let mut winning = url.clone();
                winning.short_code = code(winner);
                let _ = self.inner.create(winning).await;
            }
            self.inner.create(url).await
        }

        async fn get_by_short_code(
            &self,
            code: &ShortCode,
        ) -> snip_core::repository::Result<Option<UrlEntity>> {
            self.inner.get_by_short_code(code).await
        }

        async fn get_by_owner_and_url(
            &self,
            original_url: &str,
            owner_id: i64,
        ) -> snip_core::repository::Result<Option<UrlEntity>> {
            if let Some(err) = &self.dedup_error {
                return Err(err.clone());
            }
            self.inner.get_by_owner_and_url(original_url, owner_id).await
        }

        async fn update(&self, entity: &UrlEntity) -> snip_core::repository::Result<bool> {
            self.inner.update(entity).await
        }

        async fn soft_delete(&self, code: &ShortCode) -> snip_core::repository::Result<bool> {
            self.inner.soft_delete(code).await
        }

        async fn increment_click_count(
            &self,
            code: &ShortCode,
        ) -> snip_core::repository::Result<bool> {
            self.inner.increment_click_count(code).await
        }

        async fn list_by_owner(
            &self,
            owner_id: i64,
            limit: usize,
            offset: usize,
        ) -> snip_core::repository::Result<Vec<UrlEntity>> {
            self.inner.list_by_owner(owner_id, limit, offset).await
        }
    }

    /// A cache whose backend is always down.
    struct BrokenCache;

    fn down() -> CacheError {
        CacheError::Unavailable("connection refused".to_string())
    }

    #[async_trait]
    impl UrlCache for BrokenCache {
        async fn get_url(&self, _: &ShortCode) -> snip_core::cache::Result<Option<UrlEntity>> {
            Err(down())
        }

        async fn set_url(
            &self,
            _: &ShortCode,
            _: &UrlEntity,
            _: Duration,
        ) -> snip_core::cache::Result<()> {
            Err(down())
        }

        async fn del(&self, _: &ShortCode) -> snip_core::cache::Result<()> {
            Err(down())
        }

        async fn invalidate(&self, _: &str) -> snip_core::cache::Result<()> {
            Err(down())
        }
    }

    #[async_trait]
    impl ResponseCache for BrokenCache {
        async fn get_response(
            &self,
            _: &DedupKey,
        ) -> snip_core::cache::Result<Option<UrlResponse>> {
            Err(down())
        }

        async fn set_response(
            &self,
            _: &DedupKey,
            _: &UrlResponse,
            _: Duration,
        ) -> snip_core::cache::Result<()> {
            Err(down())
        }

        async fn del_response(&self, _: &DedupKey) -> snip_core::cache::Result<()> {
            Err(down())
        }
    }

    struct RejectEverything;

    #[async_trait]
    impl UrlValidator for RejectEverything {
        fn validate(&self, _url: &str) -> std::result::Result<(), ValidationError> {
            Ok(())
        }

        async fn is_safe(&self, _url: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn resubmission_returns_the_same_code() {
        let (service, events) = service();

        let first = service
            .create_url(CreateUrlRequest::new("https://example.com/a", 1))
            .await
            .unwrap();
        let second = service
            .create_url(CreateUrlRequest::new("https://example.com/a", 1))
            .await
            .unwrap();

        assert_eq!(first.short_code, second.short_code);
        assert_eq!(first.short_url, format!("{BASE_URL}/{}", first.short_code));
        assert_eq!(service.repository().len(), 1);
        assert_eq!(events.count(EventKind::UrlCreated), 1);
    }

    #[tokio::test]
    async fn surrounding_whitespace_does_not_split_dedup() {
        let (service, _) = service();

        let padded = service
            .create_url(CreateUrlRequest::new("  https://example.com/a\n", 1))
            .await
            .unwrap();
        let plain = service
            .create_url(CreateUrlRequest::new("https://example.com/a", 1))
            .await
            .unwrap();

        assert_eq!(padded.short_code, plain.short_code);
        assert_eq!(padded.original_url, "https://example.com/a");
        assert_eq!(service.repository().len(), 1);
    }

    #[tokio::test]
    async fn control_characters_are_rejected_before_persisting() {
        let (service, events) = service();

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com/a\nb", 1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ShortenerError::Validation(ValidationError::Malformed(_))
        ));
        assert_eq!(service.repository().len(), 0);
        assert_eq!(events.count(EventKind::UrlCreated), 0);
    }

    #[tokio::test]
    async fn resubmission_without_cached_response_reuses_the_live_row() {
        let (service, events) = service();
        let request = CreateUrlRequest::new("https://example.com/a", 1);

        let first = service.create_url(request.clone()).await.unwrap();
        service
            .cache()
            .del_response(&DedupKey::new(&request.url, 1))
            .await
            .unwrap();
        let second = service.create_url(request).await.unwrap();

        assert_eq!(first.short_code, second.short_code);
        assert_eq!(service.repository().len(), 1);
        assert_eq!(events.count(EventKind::UrlCreated), 1);
    }

    #[tokio::test]
    async fn owners_do_not_share_codes() {
        let (service, _) = service();

        let a = service
            .create_url(CreateUrlRequest::new("https://example.com/a", 1))
            .await
            .unwrap();
        let b = service
            .create_url(CreateUrlRequest::new("https://example.com/a", 2))
            .await
            .unwrap();

        assert_ne!(a.short_code, b.short_code);
    }

    #[tokio::test]
    async fn zero_expiry_means_never() {
        let (service, _) = service();

        let response = service
            .create_url(CreateUrlRequest::new("https://example.com/b", 1).with_expires_in(0))
            .await
            .unwrap();

        assert!(response.expires_at.is_none());
    }

    #[tokio::test]
    async fn positive_expiry_is_counted_from_now() {
        let (service, _) = service();
        let before = Timestamp::now();

        let response = service
            .create_url(CreateUrlRequest::new("https://example.com/b", 1).with_expires_in(60))
            .await
            .unwrap();

        let expires_at = response.expires_at.unwrap();
        assert!(expires_at >= before + SignedDuration::from_secs(60));
        assert!(expires_at <= Timestamp::now() + SignedDuration::from_secs(60));
    }

    #[tokio::test]
    async fn absurd_expiry_is_rejected() {
        let (service, _) = service();

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com/b", 1).with_expires_in(i64::MAX))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ShortenerError::Validation(ValidationError::InvalidExpiry(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_converge_on_one_row() {
        let (service, _) = service();
        let service = Arc::new(service);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .create_url(CreateUrlRequest::new("https://example.com/c", 2))
                        .await
                })
            })
            .collect();

        let mut codes = Vec::new();
        for handle in handles {
            codes.push(handle.await.unwrap().unwrap().short_code);
        }

        codes.dedup();
        assert_eq!(codes.len(), 1);
        assert_eq!(service.repository().len(), 1);
    }

    #[tokio::test]
    async fn deleted_url_is_not_found() {
        let (service, _) = service();
        let created = service
            .create_url(CreateUrlRequest::new("https://example.com/d", 1))
            .await
            .unwrap();
        assert!(service.get_url(&created.short_code).await.unwrap().is_some());

        service.delete_url(&created.short_code).await.unwrap();

        assert!(service.get_url(&created.short_code).await.unwrap().is_none());
        assert!(matches!(
            service.delete_url(&created.short_code).await,
            Err(ShortenerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_unknown_code_is_not_found() {
        let (service, _) = service();
        assert!(matches!(
            service.delete_url(&code("nope123")).await,
            Err(ShortenerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_keeps_the_cached_response() {
        let (service, _) = service();
        let request = CreateUrlRequest::new("https://example.com/d", 1);
        let created = service.create_url(request.clone()).await.unwrap();

        service.delete_url(&created.short_code).await.unwrap();
        let again = service.create_url(request).await.unwrap();

        assert_eq!(again.short_code, created.short_code);
    }

    #[tokio::test]
    async fn recreate_after_delete_gets_a_new_code() {
        let (service, events) = service();
        let request = CreateUrlRequest::new("https://example.com/d", 1);
        let created = service.create_url(request.clone()).await.unwrap();

        service.delete_url(&created.short_code).await.unwrap();
        service
            .cache()
            .del_response(&DedupKey::new(&request.url, 1))
            .await
            .unwrap();
        let recreated = service.create_url(request).await.unwrap();

        assert_ne!(recreated.short_code, created.short_code);
        assert!(service
            .get_url(&recreated.short_code)
            .await
            .unwrap()
            .is_some());
        assert_eq!(events.count(EventKind::UrlCreated), 2);
    }

    #[tokio::test]
    async fn expired_entities_resolve_to_nothing() {
        let (service, _) = service();
        let stale = NewUrl::builder()
            .short_code(code("old1234"))
            .original_url("https://example.com/old")
            .owner_id(1)
            .expires_at(Some(Timestamp::now() - SignedDuration::from_secs(1)))
            .build();
        service.repository().create(stale).await.unwrap();

        assert!(service.get_url(&code("old1234")).await.unwrap().is_none());
        assert!(service
            .repository()
            .get_by_short_code(&code("old1234"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn stale_cache_entries_are_evicted() {
        let (service, _) = service();
        let mut entity = NewUrl::builder()
            .short_code(code("gone123"))
            .original_url("https://example.com/gone")
            .owner_id(1)
            .build()
            .into_entity(1, Timestamp::now());
        entity.deleted_at = Some(Timestamp::now());
        entity.active = false;
        service
            .cache()
            .set_url(&entity.short_code, &entity, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(service.get_url(&entity.short_code).await.unwrap().is_none());
        assert!(service
            .cache()
            .get_url(&entity.short_code)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn store_hits_populate_the_entity_cache() {
        let (service, _) = service();
        let created = service
            .repository()
            .create(
                NewUrl::builder()
                    .short_code(code("warm123"))
                    .original_url("https://example.com/warm")
                    .owner_id(1)
                    .build(),
            )
            .await
            .unwrap();

        assert!(service.cache().get_url(&code("warm123")).await.unwrap().is_none());
        let resolved = service.get_url(&code("warm123")).await.unwrap();

        assert_eq!(resolved, Some(created.clone()));
        assert_eq!(
            service.cache().get_url(&code("warm123")).await.unwrap(),
            Some(created)
        );
    }

    #[tokio::test]
    async fn validation_failures_are_reported() {
        let (service, _) = service();

        for url in ["", "ftp://x", "https://bit.ly/x", "not a url"] {
            let err = service
                .create_url(CreateUrlRequest::new(url, 1))
                .await
                .unwrap_err();
            assert!(matches!(err, ShortenerError::Validation(_)), "{url}: {err}");
        }
        assert!(service.repository().is_empty());
        assert!(service.validate_url("https://example.com/path").await.is_ok());
    }

    #[tokio::test]
    async fn owner_id_must_be_positive() {
        let (service, _) = service();

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com", 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShortenerError::Validation(ValidationError::InvalidOwner(0))
        ));
        assert!(service.list_urls(-1, 10, 0).await.is_err());
    }

    #[tokio::test]
    async fn unsafe_urls_are_refused() {
        let service = ShortenerService::new(
            InMemoryRepository::new(),
            MokaUrlCache::new(),
            RandomGenerator::new(7),
            Arc::new(RejectEverything),
            Arc::new(RecordingEventSink::new()),
            config(),
        );

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ShortenerError::UnsafeUrl));
        assert!(matches!(
            service.validate_url("https://example.com").await,
            Err(ShortenerError::UnsafeUrl)
        ));
    }

    async fn occupy(repository: &impl UrlRepository, short_code: &str) {
        repository
            .create(
                NewUrl::builder()
                    .short_code(code(short_code))
                    .original_url(format!("https://other.example/{short_code}"))
                    .owner_id(99)
                    .build(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn short_code_collisions_are_retried() {
        let repository = InMemoryRepository::new();
        occupy(&repository, "taken01").await;
        let (service, _) = service_with(
            repository,
            MokaUrlCache::new(),
            ScriptedGenerator::new(&["taken01", "fresh01"]),
            ShortenerConfig::builder().uniqueness_probes(0).build(),
        );

        let created = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap();

        assert_eq!(created.short_code, code("fresh01"));
    }

    #[tokio::test]
    async fn probes_skip_taken_codes() {
        let repository = FaultyRepository::default();
        occupy(&repository, "taken01").await;
        let calls_before = repository.create_calls.load(Ordering::SeqCst);
        let (service, _) = service_with(
            repository,
            MokaUrlCache::new(),
            ScriptedGenerator::new(&["taken01", "fresh02"]),
            config(),
        );

        let created = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap();

        assert_eq!(created.short_code, code("fresh02"));
        assert_eq!(
            service.repository().create_calls.load(Ordering::SeqCst) - calls_before,
            1
        );
    }

    #[tokio::test]
    async fn probing_gives_up_when_every_candidate_is_taken() {
        let repository = InMemoryRepository::new();
        occupy(&repository, "taken01").await;
        let (service, _) = service_with(
            repository,
            MokaUrlCache::new(),
            ScriptedGenerator::new(&["taken01"]),
            ShortenerConfig::builder().uniqueness_probes(2).build(),
        );

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::GenerationExhausted { probes: 2 }));
    }

    #[tokio::test]
    async fn creation_gives_up_after_max_attempts() {
        let repository = InMemoryRepository::new();
        occupy(&repository, "taken01").await;
        let (service, _) = service_with(
            repository,
            MokaUrlCache::new(),
            ScriptedGenerator::new(&["taken01"]),
            ShortenerConfig::builder()
                .uniqueness_probes(0)
                .max_create_attempts(3)
                .build(),
        );

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::CreationExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn losing_a_create_race_returns_the_winner() {
        let repository = FaultyRepository {
            race_winner: Some("winner1"),
            ..Default::default()
        };
        let (service, events) = service_with(
            repository,
            MokaUrlCache::new(),
            ScriptedGenerator::new(&["loser01"]),
            config(),
        );

        let response = service
            .create_url(CreateUrlRequest::new("https://example.com/c", 2))
            .await
            .unwrap();

        assert_eq!(response.short_code, code("winner1"));
        assert_eq!(service.repository().create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.count(EventKind::UrlCreated), 0);
    }

    #[tokio::test]
    async fn persist_failures_are_not_retried() {
        let repository = FaultyRepository {
            create_error: Some(StorageError::Timeout("insert".to_string())),
            ..Default::default()
        };
        let (service, _) = service_with(
            repository,
            MokaUrlCache::new(),
            RandomGenerator::new(7),
            config(),
        );

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::Persist(StorageError::Timeout(_))));
        assert_eq!(service.repository().create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dedup_lookup_failures_abort_the_create() {
        let repository = FaultyRepository {
            dedup_error: Some(StorageError::Unavailable("down".to_string())),
            ..Default::default()
        };
        let (service, _) = service_with(
            repository,
            MokaUrlCache::new(),
            RandomGenerator::new(7),
            config(),
        );

        let err = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::DedupCheck(_)));
        assert_eq!(service.repository().create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_outages_are_tolerated() {
        let (service, _) = service_with(
            InMemoryRepository::new(),
            BrokenCache,
            RandomGenerator::new(7),
            config(),
        );

        let first = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap();
        let second = service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .unwrap();
        assert_eq!(first.short_code, second.short_code);

        assert!(service.get_url(&first.short_code).await.unwrap().is_some());
        service.delete_url(&first.short_code).await.unwrap();
        assert!(service.get_url(&first.short_code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn event_sink_failures_do_not_fail_creates() {
        let (service, events) = service();
        events.set_failing(true);

        assert!(service
            .create_url(CreateUrlRequest::new("https://example.com", 1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn update_changes_expiry_and_metadata() {
        let (service, events) = service();
        let created = service
            .create_url(CreateUrlRequest::new("https://example.com/u", 1))
            .await
            .unwrap();
        // Warm the entity cache so the update has something to evict.
        service.get_url(&created.short_code).await.unwrap();

        let metadata = [("campaign".to_string(), serde_json::json!("spring"))].into();
        let updated = service
            .update_url(
                &created.short_code,
                UpdateUrlRequest {
                    expires_in_seconds: Some(3600),
                    metadata: Some(metadata),
                },
            )
            .await
            .unwrap();

        assert!(updated.expires_at.is_some());
        let entity = service.get_url(&created.short_code).await.unwrap().unwrap();
        assert_eq!(entity.expires_at, updated.expires_at);
        assert_eq!(entity.metadata.unwrap()["campaign"], "spring");

        let published = events.of_kind(EventKind::UrlUpdated);
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].data["updated_fields"],
            serde_json::json!(["expires_at", "metadata"])
        );
    }

    #[tokio::test]
    async fn update_with_non_positive_expiry_clears_it() {
        let (service, _) = service();
        let created = service
            .create_url(CreateUrlRequest::new("https://example.com/u", 1).with_expires_in(60))
            .await
            .unwrap();

        let updated = service
            .update_url(
                &created.short_code,
                UpdateUrlRequest {
                    expires_in_seconds: Some(0),
                    metadata: None,
                },
            )
            .await
            .unwrap();

        assert!(updated.expires_at.is_none());
    }

    #[tokio::test]
    async fn update_of_deleted_url_is_not_found() {
        let (service, events) = service();
        let created = service
            .create_url(CreateUrlRequest::new("https://example.com/u", 1))
            .await
            .unwrap();
        service.delete_url(&created.short_code).await.unwrap();

        let err = service
            .update_url(
                &created.short_code,
                UpdateUrlRequest {
                    expires_in_seconds: Some(60),
                    metadata: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::NotFound(_)));
        assert_eq!(events.count(EventKind::UrlUpdated), 0);
    }

    #[tokio::test]
    async fn empty_update_changes_nothing() {
        let (service, events) = service();
        let created = service
            .create_url(CreateUrlRequest::new("https://example.com/u", 1))
            .await
            .unwrap();

        let unchanged = service
            .update_url(&created.short_code, UpdateUrlRequest::default())
            .await
            .unwrap();

        assert_eq!(unchanged.short_code, created.short_code);
        assert_eq!(events.count(EventKind::UrlUpdated), 0);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_clamped() {
        let (service, _) = service_with(
            InMemoryRepository::new(),
            MokaUrlCache::new(),
            RandomGenerator::new(7),
            ShortenerConfig::builder().list_max_limit(2).build(),
        );
        let mut created = Vec::new();
        for i in 0..3 {
            created.push(
                service
                    .create_url(CreateUrlRequest::new(format!("https://example.com/{i}"), 7))
                    .await
                    .unwrap()
                    .short_code,
            );
        }

        let page = service.list_urls(7, 50, 0).await.unwrap();
        let codes: Vec<_> = page.into_iter().map(|r| r.short_code).collect();
        assert_eq!(codes, vec![created[2].clone(), created[1].clone()]);

        let tail = service.list_urls(7, 0, 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].short_code, created[0]);

        assert!(service.list_urls(8, 10, -5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redirect_resolves_and_records_the_click() {
        let (service, events) = service();
        let created = service
            .create_url(CreateUrlRequest::new("https://example.com/r", 1))
            .await
            .unwrap();

        let target = service
            .redirect(
                &created.short_code,
                ClickContext {
                    user_agent: "curl/8".to_string(),
                    ip_address: "10.0.0.1".to_string(),
                    referrer: String::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(target.as_deref(), Some("https://example.com/r"));

        service.shutdown(Duration::from_secs(5)).await;

        let stored = service
            .repository()
            .get_by_short_code(&created.short_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.click_count, 1);
        let clicks = events.of_kind(EventKind::UrlClicked);
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].data["user_agent"], "curl/8");
        let cached = service
            .cache()
            .get_url(&created.short_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.click_count, 1);
    }

    #[tokio::test]
    async fn redirect_to_unknown_code_is_none() {
        let (service, events) = service();

        let target = service
            .redirect(&code("missing"), ClickContext::default())
            .await
            .unwrap();

        assert!(target.is_none());
        service.shutdown(Duration::from_secs(1)).await;
        assert_eq!(events.count(EventKind::UrlClicked), 0);
    }
}
