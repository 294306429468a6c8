use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::sleep;
use tracing::{error, info, warn};

use event_booking::{
    BookingError, BookingStatus, BookingStore, DeadLetter, Metrics, NotificationChannel,
    NotificationMessage, NotificationPublisher, QueueConsumer, QueueMessage, RedeliveryPolicy,
    Result, ServiceConfig,
};

use crate::sink::NotificationSink;

/// Per-message outcome. Every variant ends in an acknowledge of the
/// consumed copy; messages that should retry are re-enqueued first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    Skipped,
    Redelivered { attempt: u32 },
    DeadLettered,
}

/// The queue-independent half of the consumer: turns one raw queue
/// message into a settled disposition.
pub struct NotificationProcessor {
    store: BookingStore,
    channel: Arc<dyn NotificationChannel>,
    sink: Arc<dyn NotificationSink>,
    policy: RedeliveryPolicy,
    metrics: Arc<Metrics>,
}

impl NotificationProcessor {
    pub fn new(
        store: BookingStore,
        channel: Arc<dyn NotificationChannel>,
        sink: Arc<dyn NotificationSink>,
        policy: RedeliveryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            channel,
            sink,
            policy,
            metrics,
        }
    }

    /// Errors returned here mean the message could not be settled at all
    /// (queue or store unreachable) and must stay unacknowledged.
    pub async fn process_message(&self, raw: &QueueMessage) -> Result<Disposition> {
        let message: NotificationMessage = match raw.deserialize_value() {
            Ok(message) => message,
            Err(BookingError::Poison(reason)) => {
                warn!(
                    "Poison message at offset {}, dead-lettering: {}",
                    raw.offset, reason
                );
                self.metrics.poison_messages.inc();
                let letter = DeadLetter::for_poison(
                    raw.key.clone(),
                    raw.payload.as_deref().unwrap_or(""),
                    &reason,
                );
                self.channel.dead_letter(&letter).await?;
                self.metrics.notifications_dead_lettered.inc();
                return Ok(Disposition::DeadLettered);
            }
            Err(e) => return Err(e),
        };

        // Re-check the source of truth. A booking compensated to FAILED
        // (or never written) must not be notified. PENDING is still
        // notifiable: the CONFIRMED flip and the queue are not ordered
        // relative to each other.
        match self.store.get(&message.event_id, &message.booking_id)? {
            None => {
                warn!(
                    "No booking {}/{} behind notification, skipping",
                    message.event_id, message.booking_id
                );
                self.metrics.notifications_skipped.inc();
                return Ok(Disposition::Skipped);
            }
            Some(booking) if booking.status == BookingStatus::Failed => {
                info!(
                    "Booking {}/{} was compensated, skipping notification",
                    message.event_id, message.booking_id
                );
                self.metrics.notifications_skipped.inc();
                return Ok(Disposition::Skipped);
            }
            Some(_) => {}
        }

        match self.sink.deliver(&message).await {
            Ok(()) => {
                self.metrics.notifications_delivered.inc();
                Ok(Disposition::Delivered)
            }
            Err(e) => {
                let next_attempt = message.attempt_count + 1;
                if self.policy.is_exhausted(next_attempt) {
                    error!(
                        "Giving up on notification for {}/{} after {} redeliveries: {}",
                        message.event_id, message.booking_id, message.attempt_count, e
                    );
                    let letter = DeadLetter::for_message(&message, &e.to_string());
                    self.channel.dead_letter(&letter).await?;
                    self.metrics.notifications_dead_lettered.inc();
                    Ok(Disposition::DeadLettered)
                } else {
                    warn!(
                        "Delivery failed for {}/{} (attempt {}), re-enqueueing: {}",
                        message.event_id, message.booking_id, next_attempt, e
                    );
                    self.channel.enqueue(&message.redelivered()).await?;
                    self.metrics.notifications_redelivered.inc();
                    Ok(Disposition::Redelivered {
                        attempt: next_attempt,
                    })
                }
            }
        }
    }
}

/// Batch loop over the queue. Receives up to `batch_size` messages,
/// settles each independently, acknowledges per message.
pub struct NotificationService {
    consumer: QueueConsumer,
    publisher: NotificationPublisher,
    processor: NotificationProcessor,
    batch_size: usize,
    receive_wait: Duration,
    policy: RedeliveryPolicy,
}

impl NotificationService {
    pub fn new(
        config: &ServiceConfig,
        store: BookingStore,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let kafka_config = config.to_kafka_config();

        let consumer = QueueConsumer::new(kafka_config.clone())?;
        consumer.subscribe(&[config.queue.notifications_topic.as_str()])?;

        let publisher = NotificationPublisher::new(kafka_config, &config.queue)?;
        let policy = RedeliveryPolicy::from_config(&config.queue);
        let processor = NotificationProcessor::new(
            store,
            Arc::new(publisher.clone()),
            sink,
            policy.clone(),
            metrics,
        );

        Ok(Self {
            consumer,
            publisher,
            processor,
            batch_size: config.queue.batch_size,
            receive_wait: config.queue.receive_wait(),
            policy,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!("Notification consumer is running...");

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }

                batch = self.consumer.recv_batch(self.batch_size, self.receive_wait) => {
                    let batch = batch?;
                    if batch.is_empty() {
                        continue;
                    }
                    self.handle_batch(&batch).await;
                }
            }
        }

        self.publisher.flush(Duration::from_secs(10)).await?;
        info!("Notification consumer shutting down...");
        Ok(())
    }

    async fn handle_batch(&self, batch: &[QueueMessage]) {
        let mut delivered = 0usize;
        let mut failed = 0usize;
        let mut pause_attempt: Option<u32> = None;

        for message in batch {
            match self.processor.process_message(message).await {
                Ok(disposition) => {
                    if let Err(e) = self.consumer.ack(message) {
                        error!("Failed to acknowledge offset {}: {}", message.offset, e);
                    }
                    match disposition {
                        Disposition::Delivered => delivered += 1,
                        Disposition::Skipped => {}
                        Disposition::Redelivered { attempt } => {
                            failed += 1;
                            pause_attempt = Some(pause_attempt.map_or(attempt, |a| a.max(attempt)));
                        }
                        Disposition::DeadLettered => failed += 1,
                    }
                }
                Err(e) => {
                    // Committing a later offset on this partition would
                    // also commit this one; leave the rest of the batch
                    // for redelivery.
                    failed += 1;
                    error!(
                        "Leaving message at offset {} unacknowledged: {}",
                        message.offset, e
                    );
                    break;
                }
            }
        }

        info!(
            "Processed batch of {}: {} delivered, {} failed",
            batch.len(),
            delivered,
            failed
        );

        // Stand-in for the queue's redelivery delay: back off before the
        // next poll when something was re-enqueued.
        if let Some(attempt) = pause_attempt {
            sleep(self.policy.delay_for(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use event_booking::{Booking, CreateBooking, InsertOutcome};
    use serde_json::{json, Map};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        enqueued: Mutex<Vec<NotificationMessage>>,
        dead_letters: Mutex<Vec<DeadLetter>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn enqueue(&self, message: &NotificationMessage) -> Result<()> {
            self.enqueued.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn dead_letter(&self, letter: &DeadLetter) -> Result<()> {
            self.dead_letters.lock().unwrap().push(letter.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<NotificationMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
            if self.fail {
                return Err(BookingError::Dependency("sink timeout".to_string()));
            }
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Fixture {
        store: BookingStore,
        channel: Arc<RecordingChannel>,
        sink: Arc<RecordingSink>,
        processor: NotificationProcessor,
    }

    fn fixture(failing_sink: bool, max_redeliveries: u32) -> Fixture {
        let store = BookingStore::in_memory();
        let channel = Arc::new(RecordingChannel::default());
        let sink = Arc::new(RecordingSink {
            fail: failing_sink,
            ..Default::default()
        });
        let policy = RedeliveryPolicy {
            max_redeliveries,
            ..Default::default()
        };
        let processor = NotificationProcessor::new(
            store.clone(),
            channel.clone(),
            sink.clone(),
            policy,
            Arc::new(Metrics::new().unwrap()),
        );
        Fixture {
            store,
            channel,
            sink,
            processor,
        }
    }

    fn confirmed_booking(store: &BookingStore, event_id: &str, booking_id: &str) -> Booking {
        let mut payload = Map::new();
        payload.insert("seats".to_string(), json!(2));
        let booking = Booking::from_request(CreateBooking {
            event_id: event_id.to_string(),
            booking_id: Some(booking_id.to_string()),
            payload,
        });
        match store.insert_if_absent(booking).unwrap() {
            InsertOutcome::Inserted(stored) => store
                .update_status(&stored.event_id, &stored.booking_id, BookingStatus::Confirmed)
                .unwrap()
                .unwrap(),
            InsertOutcome::Exists(_) => panic!("fixture booking already present"),
        }
    }

    fn raw(body: &str) -> QueueMessage {
        QueueMessage {
            topic: "notifications.booking".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Some(body.to_string()),
        }
    }

    fn raw_for(message: &NotificationMessage) -> QueueMessage {
        raw(&serde_json::to_string(message).unwrap())
    }

    #[tokio::test]
    async fn delivers_confirmed_booking() {
        let f = fixture(false, 5);
        let booking = confirmed_booking(&f.store, "evt-1", "bk-1");
        let message = NotificationMessage::for_booking(&booking);

        let disposition = f.processor.process_message(&raw_for(&message)).await.unwrap();

        assert_eq!(disposition, Disposition::Delivered);
        assert_eq!(f.sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poison_message_is_dead_lettered_without_blocking_valid_ones() {
        let f = fixture(false, 5);
        let booking = confirmed_booking(&f.store, "evt-1", "bk-1");
        let message = NotificationMessage::for_booking(&booking);

        let batch = vec![raw("{not json"), raw_for(&message)];

        let first = f.processor.process_message(&batch[0]).await.unwrap();
        let second = f.processor.process_message(&batch[1]).await.unwrap();

        assert_eq!(first, Disposition::DeadLettered);
        assert_eq!(second, Disposition::Delivered);

        // Dead-lettered, never re-enqueued
        assert_eq!(f.channel.dead_letters.lock().unwrap().len(), 1);
        assert!(f.channel.enqueued.lock().unwrap().is_empty());
        assert_eq!(f.sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn compensated_booking_is_skipped() {
        let f = fixture(false, 5);
        let booking = confirmed_booking(&f.store, "evt-1", "bk-1");
        let message = NotificationMessage::for_booking(&booking);
        f.store.compensate("evt-1", "bk-1").unwrap();

        let disposition = f.processor.process_message(&raw_for(&message)).await.unwrap();

        assert_eq!(disposition, Disposition::Skipped);
        assert!(f.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_booking_is_skipped() {
        let f = fixture(false, 5);
        // Never inserted into the store
        let ghost = Booking::from_request(CreateBooking {
            event_id: "evt-1".to_string(),
            booking_id: Some("bk-ghost".to_string()),
            payload: Map::new(),
        });
        let message = NotificationMessage::for_booking(&ghost);

        let disposition = f.processor.process_message(&raw_for(&message)).await.unwrap();

        assert_eq!(disposition, Disposition::Skipped);
        assert!(f.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_booking_is_still_notifiable() {
        let f = fixture(false, 5);
        let mut payload = Map::new();
        payload.insert("seats".to_string(), json!(1));
        let booking = Booking::from_request(CreateBooking {
            event_id: "evt-1".to_string(),
            booking_id: Some("bk-1".to_string()),
            payload,
        });
        f.store.insert_if_absent(booking.clone()).unwrap();
        let message = NotificationMessage::for_booking(&booking);

        let disposition = f.processor.process_message(&raw_for(&message)).await.unwrap();

        assert_eq!(disposition, Disposition::Delivered);
    }

    #[tokio::test]
    async fn transient_failure_bumps_attempt_and_redelivers() {
        let f = fixture(true, 5);
        let booking = confirmed_booking(&f.store, "evt-1", "bk-1");
        let message = NotificationMessage::for_booking(&booking);

        let disposition = f.processor.process_message(&raw_for(&message)).await.unwrap();

        assert_eq!(disposition, Disposition::Redelivered { attempt: 1 });

        let enqueued = f.channel.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].attempt_count, 1);
        assert!(f.channel.dead_letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_redeliveries_dead_letter() {
        let f = fixture(true, 2);
        let booking = confirmed_booking(&f.store, "evt-1", "bk-1");
        let mut message = NotificationMessage::for_booking(&booking);
        message.attempt_count = 2;

        let disposition = f.processor.process_message(&raw_for(&message)).await.unwrap();

        assert_eq!(disposition, Disposition::DeadLettered);
        assert!(f.channel.enqueued.lock().unwrap().is_empty());

        let dead_letters = f.channel.dead_letters.lock().unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].attempt_count, 2);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_safe() {
        let f = fixture(false, 5);
        let booking = confirmed_booking(&f.store, "evt-1", "bk-1");
        let message = NotificationMessage::for_booking(&booking);
        let raw = raw_for(&message);

        let first = f.processor.process_message(&raw).await.unwrap();
        let second = f.processor.process_message(&raw).await.unwrap();

        assert_eq!(first, Disposition::Delivered);
        assert_eq!(second, Disposition::Delivered);
        // One observable attempt per delivery, store untouched
        assert_eq!(f.sink.delivered.lock().unwrap().len(), 2);
        let stored = f.store.get("evt-1", "bk-1").unwrap().unwrap();
        assert_eq!(stored, booking);
    }
}
