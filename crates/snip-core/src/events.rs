use crate::entity::UrlEntity;
use crate::error::EventError;
use crate::model::ClickEvent;
use async_trait::async_trait;

/// Result type for event publication.
pub type Result<T> = std::result::Result<T, EventError>;

/// Destination for domain events.
///
/// Publication is fire-and-forget from the orchestrator's point of view:
/// failures are logged by the caller and never fail the operation.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish_created(&self, entity: &UrlEntity) -> Result<()>;

    async fn publish_updated(&self, entity: &UrlEntity, changed_fields: &[&str]) -> Result<()>;

    async fn publish_clicked(&self, event: &ClickEvent) -> Result<()>;
}
