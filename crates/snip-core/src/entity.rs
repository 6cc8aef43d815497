use crate::shortcode::ShortCode;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Free-form, string-keyed metadata attached to a URL.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A stored URL mapping, as owned by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlEntity {
    /// Store-assigned numeric identifier.
    pub id: i64,
    pub short_code: ShortCode,
    pub original_url: String,
    pub owner_id: i64,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    /// Store-authoritative click counter. Only ever incremented.
    pub click_count: i64,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub updated_at: Timestamp,
    /// Soft-delete tombstone.
    pub deleted_at: Option<Timestamp>,
}

impl UrlEntity {
    /// Returns `true` if the entity has expired as of `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// An entity is live iff it is active, not soft-deleted and not expired.
    ///
    /// Liveness is always evaluated at read time.
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.active && self.deleted_at.is_none() && !self.is_expired_at(now)
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Timestamp::now())
    }

    /// How long the entity may stay in the entity cache.
    ///
    /// The remaining lifetime when `expires_at` is set (zero if already
    /// past), `default_ttl` otherwise.
    pub fn cache_ttl_at(&self, now: Timestamp, default_ttl: Duration) -> Duration {
        match self.expires_at {
            Some(expires_at) => {
                let remaining = now.duration_until(expires_at);
                if remaining <= SignedDuration::ZERO {
                    Duration::ZERO
                } else {
                    remaining.unsigned_abs()
                }
            }
            None => default_ttl,
        }
    }
}

/// The fields the orchestrator supplies when persisting a new entity.
///
/// The repository assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct NewUrl {
    pub short_code: ShortCode,
    #[builder(setter(into))]
    pub original_url: String,
    pub owner_id: i64,
    #[builder(default)]
    pub expires_at: Option<Timestamp>,
    #[builder(default)]
    pub metadata: Option<Metadata>,
}

impl NewUrl {
    /// Materializes the entity a repository stores for this request.
    pub fn into_entity(self, id: i64, now: Timestamp) -> UrlEntity {
        UrlEntity {
            id,
            short_code: self.short_code,
            original_url: self.original_url,
            owner_id: self.owner_id,
            created_at: now,
            expires_at: self.expires_at,
            click_count: 0,
            active: true,
            metadata: self.metadata,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn entity(expires_at: Option<Timestamp>) -> UrlEntity {
        NewUrl::builder()
            .short_code(ShortCode::new_unchecked("abc123"))
            .original_url("https://example.com")
            .owner_id(1)
            .expires_at(expires_at)
            .build()
            .into_entity(1, Timestamp::now())
    }

    #[test]
    fn new_entity_is_live() {
        let e = entity(None);
        assert!(e.is_live());
        assert_eq!(e.click_count, 0);
        assert!(e.active);
    }

    #[test]
    fn expired_entity_is_not_live() {
        let now = Timestamp::now();
        let e = entity(Some(now - SignedDuration::from_secs(1)));
        assert!(e.is_expired_at(now));
        assert!(!e.is_live_at(now));
    }

    #[test]
    fn inactive_or_deleted_entity_is_not_live() {
        let mut inactive = entity(None);
        inactive.active = false;
        assert!(!inactive.is_live());

        let mut deleted = entity(None);
        deleted.deleted_at = Some(Timestamp::now());
        assert!(!deleted.is_live());
    }

    #[test]
    fn cache_ttl_defaults_without_expiry() {
        let e = entity(None);
        assert_eq!(e.cache_ttl_at(Timestamp::now(), DAY), DAY);
    }

    #[test]
    fn cache_ttl_tracks_remaining_lifetime() {
        let now = Timestamp::now();
        let e = entity(Some(now + SignedDuration::from_secs(90)));
        assert_eq!(e.cache_ttl_at(now, DAY), Duration::from_secs(90));
    }

    #[test]
    fn cache_ttl_is_zero_when_already_expired() {
        let now = Timestamp::now();
        let e = entity(Some(now - SignedDuration::from_secs(90)));
        assert_eq!(e.cache_ttl_at(now, DAY), Duration::ZERO);
    }

    #[test]
    fn entity_round_trips_through_json() {
        let mut e = entity(None);
        let mut metadata = Metadata::new();
        metadata.insert("campaign".to_string(), serde_json::json!("spring"));
        e.metadata = Some(metadata);

        let json = serde_json::to_string(&e).unwrap();
        let back: UrlEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
