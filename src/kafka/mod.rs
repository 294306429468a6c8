pub mod consumer;
pub mod producer;

pub use consumer::*;
pub use producer::*;

use async_trait::async_trait;

use crate::{DeadLetter, NotificationMessage, Result};

/// Seam over the queue's producing side. The Kafka-backed implementation
/// is [`NotificationPublisher`]; tests substitute recording doubles.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Hand a message to the queue. Best-effort from the booking
    /// handler's point of view: a failure here never rolls back the
    /// store write.
    async fn enqueue(&self, message: &NotificationMessage) -> Result<()>;

    /// Terminal escape valve for messages that can never succeed.
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<()>;
}
