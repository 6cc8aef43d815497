use crate::EventEnvelope;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use snip_core::events::Result;
use snip_core::{ClickEvent, EventError, EventSink, UrlEntity};
use tracing::{debug, warn};

/// Publishes events to Redis Streams, one stream per topic.
///
/// Each entry carries two fields: `key` (the short code) and `payload` (the
/// JSON envelope). Streams are trimmed approximately to `max_len` entries.
#[derive(Clone)]
pub struct RedisStreamEventSink {
    conn: MultiplexedConnection,
    stream_prefix: String,
    max_len: usize,
}

impl RedisStreamEventSink {
    pub const DEFAULT_MAX_LEN: usize = 100_000;

    pub fn new(conn: MultiplexedConnection) -> Self {
        Self::with_prefix(conn, "")
    }

    /// Stream names become `{prefix}{topic}`, e.g. `snip:url.created`.
    pub fn with_prefix(conn: MultiplexedConnection, stream_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            stream_prefix: stream_prefix.into(),
            max_len: Self::DEFAULT_MAX_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn stream_name(&self, topic: &str) -> String {
        format!("{}{}", self.stream_prefix, topic)
    }

    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let stream = self.stream_name(envelope.topic());
        let payload = envelope.to_json()?;
        let mut conn = self.conn.clone();

        let id = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("key")
            .arg(&envelope.key)
            .arg("payload")
            .arg(payload)
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                warn!(stream = %stream, error = %e, "Failed to append event");
                EventError::Transport(format!("XADD {stream}: {e}"))
            })?;

        debug!(stream = %stream, id = %id, key = %envelope.key, "Event appended");
        Ok(())
    }
}

#[async_trait]
impl EventSink for RedisStreamEventSink {
    async fn publish_created(&self, entity: &UrlEntity) -> Result<()> {
        self.publish(EventEnvelope::created(entity)).await
    }

    async fn publish_updated(&self, entity: &UrlEntity, changed_fields: &[&str]) -> Result<()> {
        self.publish(EventEnvelope::updated(entity, changed_fields))
            .await
    }

    async fn publish_clicked(&self, event: &ClickEvent) -> Result<()> {
        self.publish(EventEnvelope::clicked(event)).await
    }
}
