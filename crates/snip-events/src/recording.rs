use crate::{EventEnvelope, EventKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use snip_core::events::Result;
use snip_core::{ClickEvent, EventError, EventSink, UrlEntity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory [`EventSink`] that keeps every published envelope.
///
/// Clones share the same log, so a test can hand one clone to the service and
/// inspect the other. [`set_failing`](Self::set_failing) makes every publish
/// fail without recording anything.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns a snapshot of everything published so far.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    /// Returns the events of one kind, oldest first.
    pub fn of_kind(&self, kind: EventKind) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == kind)
            .count()
    }

    fn record(&self, envelope: EventEnvelope) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventError::Transport("recording sink set to fail".to_string()));
        }
        self.events.lock().push(envelope);
        Ok(())
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish_created(&self, entity: &UrlEntity) -> Result<()> {
        self.record(EventEnvelope::created(entity))
    }

    async fn publish_updated(&self, entity: &UrlEntity, changed_fields: &[&str]) -> Result<()> {
        self.record(EventEnvelope::updated(entity, changed_fields))
    }

    async fn publish_clicked(&self, event: &ClickEvent) -> Result<()> {
        self.record(EventEnvelope::clicked(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use snip_core::{ClickContext, NewUrl, ShortCode};

    fn entity() -> UrlEntity {
        NewUrl::builder()
            .short_code(ShortCode::new_unchecked("abc1234"))
            .original_url("https://example.com")
            .owner_id(1)
            .build()
            .into_entity(1, Timestamp::now())
    }

    #[tokio::test]
    async fn clones_share_the_log() {
        let sink = RecordingEventSink::new();
        let observer = sink.clone();

        sink.publish_created(&entity()).await.unwrap();
        sink.publish_updated(&entity(), &["expires_at"]).await.unwrap();
        sink.publish_clicked(&ClickEvent::new(
            ShortCode::new_unchecked("abc1234"),
            ClickContext::default(),
        ))
        .await
        .unwrap();

        assert_eq!(observer.events().len(), 3);
        assert_eq!(observer.count(EventKind::UrlCreated), 1);
        assert_eq!(observer.of_kind(EventKind::UrlUpdated)[0].key, "abc1234");
    }

    #[tokio::test]
    async fn failing_sink_reports_transport_error() {
        let sink = RecordingEventSink::new();
        sink.set_failing(true);

        let err = sink.publish_created(&entity()).await.unwrap_err();

        assert!(matches!(err, EventError::Transport(_)));
        assert!(sink.events().is_empty());
    }
}
