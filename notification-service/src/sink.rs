use async_trait::async_trait;
use tracing::info;

use event_booking::{NotificationMessage, Result};

/// The side-effecting delivery target: an email/SMS/webhook provider.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &NotificationMessage) -> Result<()>;
}

/// Log-only sink standing in for a real provider integration.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
        info!(
            "Notification sent: booking {} confirmed for event {} ({})",
            message.booking_id,
            message.event_id,
            serde_json::to_string(&message.payload).unwrap_or_default()
        );
        Ok(())
    }
}
