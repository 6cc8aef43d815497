use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::Timestamp;
use snip_core::repository::Result;
use snip_core::{
    ConstraintViolation, NewUrl, ShortCode, StorageError, UrlEntity, UrlRepository,
};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, trace};

const SHORT_CODE_CONSTRAINT: &str = "memory.rows.short_code";
const DEDUP_KEY_CONSTRAINT: &str = "memory.dedup.owner_url";

type OwnerUrl = (i64, String);

/// In-memory implementation of [`UrlRepository`] using DashMap.
///
/// `rows` holds every entity ever created, keyed by short code, so codes are
/// never reused. `dedup` maps an (owner, URL) pair to the code of its
/// current active, non-deleted row; the row may have expired since.
///
/// Lock order is `dedup` before `rows`. A `rows` guard is never held while
/// touching `dedup`.
#[derive(Debug)]
pub struct InMemoryRepository {
    rows: DashMap<String, UrlEntity>,
    dedup: DashMap<OwnerUrl, String>,
    next_id: AtomicI64,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new in-memory repository with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: DashMap::with_capacity(capacity),
            dedup: DashMap::with_capacity(capacity),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of rows, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn tombstone(entity: &mut UrlEntity, now: Timestamp) {
        entity.active = false;
        entity.deleted_at = Some(now);
        entity.updated_at = now;
    }

    /// Tombstones `code` if it is still active but expired, then releases
    /// its dedup slot.
    fn expire(&self, code: &str, now: Timestamp) {
        let key = {
            let Some(mut row) = self.rows.get_mut(code) else {
                return;
            };
            if !(row.active && row.deleted_at.is_none() && row.is_expired_at(now)) {
                return;
            }
            Self::tombstone(&mut row, now);
            (row.owner_id, row.original_url.clone())
        };

        self.dedup.remove_if(&key, |_, current| current == code);
        debug!(code, "Tombstoned expired entity");
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlRepository for InMemoryRepository {
    async fn create(&self, url: NewUrl) -> Result<UrlEntity> {
        let now = Timestamp::now();
        let code = url.short_code.as_str().to_owned();

        let slot = self.dedup.entry((url.owner_id, url.original_url.clone()));
        if let Entry::Occupied(ref existing) = slot {
            if let Some(mut row) = self.rows.get_mut(existing.get().as_str()) {
                if row.is_live_at(now) {
                    return Err(StorageError::UniqueViolation(
                        ConstraintViolation::dedup_key(DEDUP_KEY_CONSTRAINT),
                    ));
                }
                // The previous mapping expired without being tombstoned yet.
                if row.active && row.deleted_at.is_none() {
                    Self::tombstone(&mut row, now);
                }
            }
        }

        let entity = match self.rows.entry(code.clone()) {
            Entry::Occupied(_) => {
                return Err(StorageError::UniqueViolation(
                    ConstraintViolation::short_code(SHORT_CODE_CONSTRAINT),
                ));
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let entity = url.into_entity(id, now);
                vacant.insert(entity.clone());
                entity
            }
        };
        slot.insert(code);

        trace!(code = %entity.short_code, id = entity.id, "Stored entity in memory");
        Ok(entity)
    }

    async fn get_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        Ok(self.rows.get(code.as_str()).map(|row| row.value().clone()))
    }

    async fn get_by_owner_and_url(
        &self,
        original_url: &str,
        owner_id: i64,
    ) -> Result<Option<UrlEntity>> {
        let now = Timestamp::now();
        let Some(code) = self
            .dedup
            .get(&(owner_id, original_url.to_owned()))
            .map(|slot| slot.value().clone())
        else {
            return Ok(None);
        };

        let entity = self.rows.get(code.as_str()).map(|row| row.value().clone());
        match entity {
            Some(entity) if entity.is_live_at(now) => Ok(Some(entity)),
            Some(_) => {
                self.expire(&code, now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn update(&self, entity: &UrlEntity) -> Result<bool> {
        let Some(mut row) = self.rows.get_mut(entity.short_code.as_str()) else {
            return Ok(false);
        };
        if !row.active || row.deleted_at.is_some() {
            return Ok(false);
        }

        row.expires_at = entity.expires_at;
        row.metadata = entity.metadata.clone();
        row.updated_at = Timestamp::now();
        Ok(true)
    }

    async fn soft_delete(&self, code: &ShortCode) -> Result<bool> {
        let key = {
            let Some(mut row) = self.rows.get_mut(code.as_str()) else {
                return Ok(false);
            };
            if !row.active || row.deleted_at.is_some() {
                return Ok(false);
            }
            Self::tombstone(&mut row, Timestamp::now());
            (row.owner_id, row.original_url.clone())
        };

        self.dedup
            .remove_if(&key, |_, current| current == code.as_str());
        Ok(true)
    }

    async fn increment_click_count(&self, code: &ShortCode) -> Result<bool> {
        match self.rows.get_mut(code.as_str()) {
            Some(mut row) if row.active && row.deleted_at.is_none() => {
                row.click_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_owner(
        &self,
        owner_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UrlEntity>> {
        let now = Timestamp::now();
        let mut owned: Vec<UrlEntity> = self
            .rows
            .iter()
            .filter(|row| row.owner_id == owner_id && row.is_live_at(now))
            .map(|row| row.value().clone())
            .collect();

        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(owned.into_iter().skip(offset).take(limit).collect())
    }
}
