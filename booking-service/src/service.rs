use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use event_booking::{
    Booking, BookingError, BookingStatus, BookingStore, CreateBooking, InsertOutcome, Metrics,
    NotificationChannel, NotificationMessage, Result,
};

/// Synchronous request processor: validates input, writes the booking,
/// hands a notification to the queue. One store write and at most one
/// enqueue per invocation.
#[derive(Clone)]
pub struct BookingService {
    store: BookingStore,
    channel: Arc<dyn NotificationChannel>,
    metrics: Arc<Metrics>,
}

impl BookingService {
    pub fn new(
        store: BookingStore,
        channel: Arc<dyn NotificationChannel>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            channel,
            metrics,
        }
    }

    pub async fn create_booking(&self, request: CreateBooking) -> Result<Booking> {
        request.validate()?;

        let payload = request.payload.clone();
        let booking = Booking::from_request(request);

        let write_started = Instant::now();
        let outcome = self.store.insert_if_absent(booking)?;
        self.metrics
            .store_write_duration
            .observe(write_started.elapsed().as_secs_f64());

        let stored = match outcome {
            InsertOutcome::Exists(existing) => {
                if existing.payload == payload {
                    // Idempotent retry of the same submission
                    self.metrics.booking_replays.inc();
                    info!(
                        "Replayed booking {}/{}",
                        existing.event_id, existing.booking_id
                    );
                    return Ok(existing);
                }
                self.metrics.booking_conflicts.inc();
                return Err(BookingError::Conflict {
                    event_id: existing.event_id,
                    booking_id: existing.booking_id,
                });
            }
            InsertOutcome::Inserted(stored) => stored,
        };

        self.metrics.bookings_created.inc();
        info!("Created booking {}/{}", stored.event_id, stored.booking_id);

        let message = NotificationMessage::for_booking(&stored);
        match self.channel.enqueue(&message).await {
            Ok(()) => {
                self.metrics.notifications_enqueued.inc();
                match self.store.update_status(
                    &stored.event_id,
                    &stored.booking_id,
                    BookingStatus::Confirmed,
                ) {
                    Ok(Some(confirmed)) => Ok(confirmed),
                    Ok(None) => Ok(stored),
                    Err(e) => {
                        // Booking is durable and the message is enqueued;
                        // the record stays PENDING for reconciliation.
                        warn!(
                            "Failed to confirm booking {}/{}: {}",
                            stored.event_id, stored.booking_id, e
                        );
                        Ok(stored)
                    }
                }
            }
            Err(e) => {
                // Not rolled back: the booking stays PENDING until a
                // reconciliation sweep re-derives the missing notification.
                self.metrics.enqueue_failures.inc();
                error!(
                    "Notification enqueue failed for booking {}/{}: {}",
                    stored.event_id, stored.booking_id, e
                );
                Ok(stored)
            }
        }
    }

    pub fn list_bookings(&self, event_id: Option<&str>) -> Result<Vec<Booking>> {
        match event_id {
            Some(event_id) => self.store.list_by_event(event_id),
            None => self.store.list_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use event_booking::DeadLetter;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        enqueued: Mutex<Vec<NotificationMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn enqueue(&self, message: &NotificationMessage) -> Result<()> {
            if self.fail {
                return Err(BookingError::Dependency("queue offline".to_string()));
            }
            self.enqueued.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn dead_letter(&self, _letter: &DeadLetter) -> Result<()> {
            Ok(())
        }
    }

    fn service(fail_enqueue: bool) -> (BookingService, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel {
            fail: fail_enqueue,
            ..Default::default()
        });
        let service = BookingService::new(
            BookingStore::in_memory(),
            channel.clone(),
            Arc::new(Metrics::new().unwrap()),
        );
        (service, channel)
    }

    fn request(event_id: &str, booking_id: &str, seats: u64) -> CreateBooking {
        let mut payload = Map::new();
        payload.insert("seats".to_string(), json!(seats));
        CreateBooking {
            event_id: event_id.to_string(),
            booking_id: Some(booking_id.to_string()),
            payload,
        }
    }

    #[tokio::test]
    async fn create_confirms_and_enqueues() {
        let (service, channel) = service(false);

        let booking = service
            .create_booking(request("evt-1", "bk-1", 2))
            .await
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payload["seats"], json!(2));

        let enqueued = channel.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].event_id, "evt-1");
        assert_eq!(enqueued[0].booking_id, "bk-1");
        assert_eq!(enqueued[0].attempt_count, 0);
    }

    #[tokio::test]
    async fn duplicate_submission_is_idempotent() {
        let (service, channel) = service(false);

        let first = service
            .create_booking(request("evt-1", "bk-1", 2))
            .await
            .unwrap();
        let second = service
            .create_booking(request("evt-1", "bk-1", 2))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(service.list_bookings(Some("evt-1")).unwrap().len(), 1);
        // No second enqueue for the replay
        assert_eq!(channel.enqueued.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn divergent_payload_is_a_conflict() {
        let (service, _channel) = service(false);

        service
            .create_booking(request("evt-1", "bk-1", 2))
            .await
            .unwrap();
        let err = service
            .create_booking(request("evt-1", "bk-1", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Conflict { .. }));

        // Original record unchanged
        let bookings = service.list_bookings(Some("evt-1")).unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].payload["seats"], json!(2));
        assert_eq!(bookings[0].status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn enqueue_failure_keeps_booking_durable() {
        let (service, _channel) = service(true);

        let booking = service
            .create_booking(request("evt-1", "bk-1", 2))
            .await
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);

        let bookings = service.list_bookings(Some("evt-1")).unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn validation_failure_has_no_side_effects() {
        let (service, channel) = service(false);

        let err = service
            .create_booking(request("", "bk-1", 2))
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Validation(_)));
        assert!(service.list_bookings(None).unwrap().is_empty());
        assert!(channel.enqueued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_separator_in_id_is_rejected() {
        let (service, _channel) = service(false);

        let err = service
            .create_booking(request("evt#1", "bk-1", 2))
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn list_filters_by_event() {
        let (service, _channel) = service(false);

        service
            .create_booking(request("evt-1", "bk-1", 1))
            .await
            .unwrap();
        service
            .create_booking(request("evt-1", "bk-2", 1))
            .await
            .unwrap();
        service
            .create_booking(request("evt-2", "bk-1", 1))
            .await
            .unwrap();

        assert_eq!(service.list_bookings(Some("evt-1")).unwrap().len(), 2);
        assert_eq!(service.list_bookings(Some("evt-2")).unwrap().len(), 1);
        assert_eq!(service.list_bookings(None).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn generated_ids_make_distinct_bookings() {
        let (service, _channel) = service(false);

        let request = CreateBooking {
            event_id: "evt-1".to_string(),
            booking_id: None,
            payload: Map::new(),
        };

        service.create_booking(request.clone()).await.unwrap();
        service.create_booking(request).await.unwrap();

        assert_eq!(service.list_bookings(Some("evt-1")).unwrap().len(), 2);
    }
}
