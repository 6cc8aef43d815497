use crate::entity::{NewUrl, UrlEntity};
use crate::error::StorageError;
use crate::shortcode::ShortCode;
use async_trait::async_trait;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The durable record of URL entities and the source of truth.
///
/// Absence is reported as `Ok(None)` / `Ok(false)`, never as an error.
/// Uniqueness failures surface as [`StorageError::UniqueViolation`] naming
/// the violated constraint.
#[async_trait]
pub trait UrlRepository: Send + Sync + 'static {
    /// Persists a new entity, assigning its id and timestamps.
    ///
    /// Fails with a short-code violation if the code was ever used, or with a
    /// dedup-key violation if a live entity exists for the same owner and URL.
    async fn create(&self, url: NewUrl) -> Result<UrlEntity>;

    /// Returns the row stored under `code` whether or not it is live.
    async fn get_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlEntity>>;

    /// Returns the live entity for the (owner, URL) pair, if any.
    ///
    /// Implementations may tombstone expired matches they come across.
    async fn get_by_owner_and_url(
        &self,
        original_url: &str,
        owner_id: i64,
    ) -> Result<Option<UrlEntity>>;

    /// Overwrites the mutable fields (`expires_at`, `metadata`) of a live entity.
    /// Returns `false` if no live entity exists under that code.
    async fn update(&self, entity: &UrlEntity) -> Result<bool>;

    /// Marks the entity inactive and tombstones it.
    /// Returns `false` if the code does not exist or is already inactive.
    async fn soft_delete(&self, code: &ShortCode) -> Result<bool>;

    /// Atomically increments the click counter of an active entity.
    /// Returns `false` if no active entity exists under that code.
    async fn increment_click_count(&self, code: &ShortCode) -> Result<bool>;

    /// Lists an owner's live entities, newest first.
    async fn list_by_owner(
        &self,
        owner_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UrlEntity>>;
}
