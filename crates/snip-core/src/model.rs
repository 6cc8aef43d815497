use crate::entity::{Metadata, UrlEntity};
use crate::shortcode::ShortCode;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A request to shorten a URL on behalf of an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUrlRequest {
    pub url: String,
    pub owner_id: i64,
    /// Lifetime in seconds. Zero or negative means "never expires".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl CreateUrlRequest {
    pub fn new(url: impl Into<String>, owner_id: i64) -> Self {
        Self {
            url: url.into(),
            owner_id,
            expires_in_seconds: None,
            metadata: None,
        }
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in_seconds = Some(seconds);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Mutable fields of an existing URL. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUrlRequest {
    /// New lifetime counted from now. Zero or negative clears the expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// The externally visible view of a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlResponse {
    pub short_code: ShortCode,
    pub short_url: String,
    pub original_url: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    pub click_count: i64,
}

impl UrlResponse {
    pub fn from_entity(entity: &UrlEntity, base_url: &str) -> Self {
        Self {
            short_code: entity.short_code.clone(),
            short_url: entity.short_code.to_url(base_url),
            original_url: entity.original_url.clone(),
            created_at: entity.created_at,
            expires_at: entity.expires_at,
            click_count: entity.click_count,
        }
    }
}

/// Request-side details captured when a short code is followed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickContext {
    pub user_agent: String,
    pub ip_address: String,
    pub referrer: String,
}

/// An analytics event describing one redirect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub short_code: ShortCode,
    pub timestamp: Timestamp,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub referrer: String,
}

impl ClickEvent {
    pub fn new(short_code: ShortCode, context: ClickContext) -> Self {
        Self {
            short_code,
            timestamp: Timestamp::now(),
            ip_address: context.ip_address,
            user_agent: context.user_agent,
            referrer: context.referrer,
        }
    }
}
