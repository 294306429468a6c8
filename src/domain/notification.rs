use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Booking;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    BookingCreated,
}

/// The unit passed through the queue. Carries the booking payload so the
/// consumer can act without reading the store; the consumer still
/// re-checks current status before delivering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMessage {
    pub event_id: String,
    pub booking_id: String,
    pub action: NotificationAction,
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// 0 on first enqueue, bumped once per redelivery.
    #[serde(default)]
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            event_id: booking.event_id.clone(),
            booking_id: booking.booking_id.clone(),
            action: NotificationAction::BookingCreated,
            payload: booking.payload.clone(),
            attempt_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Copy re-enqueued after a transient delivery failure.
    pub fn redelivered(&self) -> Self {
        Self {
            attempt_count: self.attempt_count + 1,
            ..self.clone()
        }
    }
}

/// Envelope published to the dead-letter topic for messages that can
/// never succeed: poison bodies and deliveries past the redelivery cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub key: Option<String>,
    /// The offending message, or the raw body as a JSON string when it
    /// could not be parsed at all.
    pub payload: Value,
    pub reason: String,
    pub attempt_count: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn for_message(message: &NotificationMessage, reason: &str) -> Self {
        Self {
            key: Some(crate::booking_key(&message.event_id, &message.booking_id)),
            payload: serde_json::to_value(message).unwrap_or(Value::Null),
            reason: reason.to_string(),
            attempt_count: message.attempt_count,
            failed_at: Utc::now(),
        }
    }

    pub fn for_poison(key: Option<String>, raw_body: &str, reason: &str) -> Self {
        Self {
            key,
            payload: Value::String(raw_body.to_string()),
            reason: reason.to_string(),
            attempt_count: 0,
            failed_at: Utc::now(),
        }
    }
}
