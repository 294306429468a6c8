use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{BookingError, Result};

/// Separator used in composite store keys. Rejected inside ids at
/// validation time so keys stay unambiguous.
pub const KEY_SEPARATOR: char = '#';

pub fn booking_key(event_id: &str, booking_id: &str) -> String {
    format!("{}{}{}", event_id, KEY_SEPARATOR, booking_id)
}

/// Prefix matching every booking of one event.
pub fn event_prefix(event_id: &str) -> String {
    format!("{}{}", event_id, KEY_SEPARATOR)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Inbound shape of `POST /bookings`. `booking_id` is optional; when the
/// caller omits it a server-side id is generated, which also opts the
/// caller out of idempotent retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBooking {
    pub event_id: String,
    pub booking_id: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl CreateBooking {
    pub fn validate(&self) -> Result<()> {
        validate_id("event_id", &self.event_id)?;
        if let Some(booking_id) = &self.booking_id {
            validate_id("booking_id", booking_id)?;
        }
        Ok(())
    }
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BookingError::Validation(format!(
            "Missing required field: {}",
            field
        )));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(BookingError::Validation(format!(
            "Field {} must not contain '{}'",
            field, KEY_SEPARATOR
        )));
    }
    Ok(())
}

/// The durable unit of state, one record per (event_id, booking_id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub event_id: String,
    pub booking_id: String,
    pub status: BookingStatus,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    /// Reserved for future expiry; never set by the core and never acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Booking {
    pub fn from_request(request: CreateBooking) -> Self {
        let booking_id = request
            .booking_id
            .unwrap_or_else(|| format!("booking-{}", Uuid::new_v4()));

        Self {
            event_id: request.event_id,
            booking_id,
            status: BookingStatus::Pending,
            payload: request.payload,
            created_at: Utc::now(),
            ttl: None,
        }
    }

    pub fn key(&self) -> String {
        booking_key(&self.event_id, &self.booking_id)
    }
}
