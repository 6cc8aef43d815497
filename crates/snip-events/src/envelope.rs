use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use snip_core::{ClickEvent, EventError, UrlEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UrlCreated,
    UrlUpdated,
    UrlClicked,
}

impl EventKind {
    /// The topic (stream) this kind of event is published to.
    pub fn topic(self) -> &'static str {
        match self {
            EventKind::UrlCreated => "url.created",
            EventKind::UrlUpdated => "url.updated",
            EventKind::UrlClicked => "url.clicked",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UrlCreated => "url_created",
            EventKind::UrlUpdated => "url_updated",
            EventKind::UrlClicked => "url_clicked",
        }
    }
}

/// The wire shape shared by every sink: `{event_type, timestamp, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: EventKind,
    pub timestamp: Timestamp,
    pub data: Value,
    /// Partitioning key; the short code the event is about.
    #[serde(skip)]
    pub key: String,
}

impl EventEnvelope {
    pub fn created(entity: &UrlEntity) -> Self {
        let mut data = json!({
            "short_code": entity.short_code,
            "original_url": entity.original_url,
            "owner_id": entity.owner_id,
        });
        if let (Some(expires_at), Some(fields)) = (entity.expires_at, data.as_object_mut()) {
            fields.insert("expires_at".to_string(), json!(expires_at));
        }

        Self {
            event_type: EventKind::UrlCreated,
            timestamp: entity.created_at,
            data,
            key: entity.short_code.to_string(),
        }
    }

    pub fn updated(entity: &UrlEntity, changed_fields: &[&str]) -> Self {
        let mut data = Map::new();
        data.insert("short_code".to_string(), json!(entity.short_code));
        data.insert("original_url".to_string(), json!(entity.original_url));
        data.insert("owner_id".to_string(), json!(entity.owner_id));
        data.insert("updated_fields".to_string(), json!(changed_fields));
        if let Some(expires_at) = entity.expires_at {
            data.insert("expires_at".to_string(), json!(expires_at));
        }
        if let Some(metadata) = entity.metadata.as_ref().filter(|m| !m.is_empty()) {
            data.insert("metadata".to_string(), json!(metadata));
        }

        Self {
            event_type: EventKind::UrlUpdated,
            timestamp: Timestamp::now(),
            data: Value::Object(data),
            key: entity.short_code.to_string(),
        }
    }

    pub fn clicked(event: &ClickEvent) -> Self {
        Self {
            event_type: EventKind::UrlClicked,
            timestamp: event.timestamp,
            data: json!({
                "short_code": event.short_code,
                "user_agent": event.user_agent,
                "ip_address": event.ip_address,
                "referrer": event.referrer,
            }),
            key: event.short_code.to_string(),
        }
    }

    pub fn topic(&self) -> &'static str {
        self.event_type.topic()
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Serialization(e.to_string()))
    }
}
