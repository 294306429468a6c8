use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Serialize;
use std::time::Duration;

use crate::{
    booking_key, BookingError, DeadLetter, NotificationChannel, NotificationMessage, QueueConfig,
    Result,
};

/// Kafka-backed producing side of the notification queue.
#[derive(Clone)]
pub struct NotificationPublisher {
    producer: FutureProducer,
    notifications_topic: String,
    dead_letter_topic: String,
    send_timeout: Duration,
}

impl NotificationPublisher {
    pub fn new(config: ClientConfig, queue: &QueueConfig) -> Result<Self> {
        let producer: FutureProducer = config.create()?;
        Ok(Self {
            producer,
            notifications_topic: queue.notifications_topic.clone(),
            dead_letter_topic: queue.dead_letter_topic.clone(),
            send_timeout: queue.send_timeout(),
        })
    }

    async fn send<T>(&self, topic: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(value)?;

        let record = FutureRecord::to(topic).key(key).payload(&payload);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(kafka_err, _)| BookingError::Kafka(kafka_err))?;

        Ok(())
    }

    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for NotificationPublisher {
    async fn enqueue(&self, message: &NotificationMessage) -> Result<()> {
        let key = booking_key(&message.event_id, &message.booking_id);
        self.send(&self.notifications_topic, &key, message).await
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        let key = letter.key.clone().unwrap_or_default();
        self.send(&self.dead_letter_topic, &key, letter).await
    }
}
