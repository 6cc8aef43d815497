use crate::EventEnvelope;
use async_trait::async_trait;
use snip_core::events::Result;
use snip_core::{ClickEvent, EventSink, UrlEntity};
use tracing::info;

/// An [`EventSink`] that writes every event to the `tracing` pipeline.
///
/// Useful for single-node deployments and local development where no broker
/// is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }

    fn emit(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload = envelope.to_json()?;
        info!(
            target: "snip::events",
            topic = envelope.topic(),
            key = %envelope.key,
            payload = %payload,
            "Event published"
        );
        Ok(())
    }
}

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish_created(&self, entity: &UrlEntity) -> Result<()> {
        self.emit(&EventEnvelope::created(entity))
    }

    async fn publish_updated(&self, entity: &UrlEntity, changed_fields: &[&str]) -> Result<()> {
        self.emit(&EventEnvelope::updated(entity, changed_fields))
    }

    async fn publish_clicked(&self, event: &ClickEvent) -> Result<()> {
        self.emit(&EventEnvelope::clicked(event))
    }
}
