use prometheus::{
    register_counter_with_registry, register_histogram_with_registry, Counter, Encoder, Histogram,
    HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::{BookingError, Result};

/// Metrics for the booking pipeline. One instance per process,
/// shared behind an Arc.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Booking handler
    pub bookings_created: Counter,
    pub booking_replays: Counter,
    pub booking_conflicts: Counter,
    pub notifications_enqueued: Counter,
    /// Enqueue failed after a durable store write; these records stay
    /// PENDING until a reconciliation sweep picks them up.
    pub enqueue_failures: Counter,

    // Notification consumer
    pub notifications_delivered: Counter,
    pub notifications_skipped: Counter,
    pub notifications_redelivered: Counter,
    pub notifications_dead_lettered: Counter,
    pub poison_messages: Counter,

    // Latency
    pub store_write_duration: Histogram,
    pub request_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let bookings_created = register_counter_with_registry!(
            Opts::new("bookings_created_total", "Bookings durably written"),
            registry
        )?;

        let booking_replays = register_counter_with_registry!(
            Opts::new(
                "booking_replays_total",
                "Duplicate submissions resolved idempotently"
            ),
            registry
        )?;

        let booking_conflicts = register_counter_with_registry!(
            Opts::new(
                "booking_conflicts_total",
                "Duplicate keys rejected for divergent payloads"
            ),
            registry
        )?;

        let notifications_enqueued = register_counter_with_registry!(
            Opts::new(
                "notifications_enqueued_total",
                "Notification messages handed to the queue"
            ),
            registry
        )?;

        let enqueue_failures = register_counter_with_registry!(
            Opts::new(
                "notification_enqueue_failures_total",
                "Enqueue failures after a successful store write"
            ),
            registry
        )?;

        let notifications_delivered = register_counter_with_registry!(
            Opts::new(
                "notifications_delivered_total",
                "Notifications delivered to the sink"
            ),
            registry
        )?;

        let notifications_skipped = register_counter_with_registry!(
            Opts::new(
                "notifications_skipped_total",
                "Notifications skipped after the store re-check"
            ),
            registry
        )?;

        let notifications_redelivered = register_counter_with_registry!(
            Opts::new(
                "notifications_redelivered_total",
                "Messages re-enqueued after transient delivery failure"
            ),
            registry
        )?;

        let notifications_dead_lettered = register_counter_with_registry!(
            Opts::new(
                "notifications_dead_lettered_total",
                "Messages moved to the dead-letter topic"
            ),
            registry
        )?;

        let poison_messages = register_counter_with_registry!(
            Opts::new("poison_messages_total", "Unparseable queue messages"),
            registry
        )?;

        let store_write_duration = register_histogram_with_registry!(
            HistogramOpts::new(
                "store_write_duration_seconds",
                "Time spent writing to the booking store"
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
            registry
        )?;

        let request_duration = register_histogram_with_registry!(
            HistogramOpts::new(
                "request_duration_seconds",
                "Time spent processing HTTP requests"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            registry
        )?;

        Ok(Self {
            registry,
            bookings_created,
            booking_replays,
            booking_conflicts,
            notifications_enqueued,
            enqueue_failures,
            notifications_delivered,
            notifications_skipped,
            notifications_redelivered,
            notifications_dead_lettered,
            poison_messages,
            store_write_duration,
            request_duration,
        })
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| BookingError::Dependency(format!("Metrics encoding: {}", e)))
    }
}

/// Prometheus scrape endpoint. Routers whose state can lend an
/// `Arc<Metrics>` (via `FromRef`) can mount this directly.
pub async fn metrics_endpoint(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.export() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to export metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
