use async_trait::async_trait;
use seating_shared::SeatingEvent;

use crate::error::SeatingResult;

/// Outbound channel for domain events (`seats.held`, `dp.override.applied`, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &SeatingEvent) -> SeatingResult<()>;
}

/// Sink that drops everything. Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: &SeatingEvent) -> SeatingResult<()> {
        Ok(())
    }
}
