use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::{timeout, Instant};

use crate::{BookingError, Result};

/// Kafka-backed consuming side of the notification queue. Delivers
/// batches with a bounded wait and commits offsets one message at a
/// time, so partial batch failure never blocks acknowledged messages.
pub struct QueueConsumer {
    consumer: StreamConsumer,
}

impl QueueConsumer {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let consumer: StreamConsumer = config.create()?;
        Ok(Self { consumer })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer.subscribe(topics)?;
        Ok(())
    }

    /// Up to `max` messages, waiting at most `max_wait` overall. An empty
    /// batch just means the wait elapsed.
    pub async fn recv_batch(&self, max: usize, max_wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + max_wait;
        let mut batch = Vec::new();

        while batch.len() < max {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(message)) => {
                    let key = message.key().map(|k| String::from_utf8_lossy(k).to_string());
                    let payload = message
                        .payload()
                        .map(|p| String::from_utf8_lossy(p).to_string());

                    batch.push(QueueMessage {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        key,
                        payload,
                    });
                }
                Ok(Err(e)) => return Err(BookingError::Kafka(e)),
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    /// Acknowledge a single message by committing the offset past it.
    pub fn ack(&self, message: &QueueMessage) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            rdkafka::Offset::Offset(message.offset + 1),
        )?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Sync)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<String>,
}

impl QueueMessage {
    /// Malformed or empty bodies surface as [`BookingError::Poison`]:
    /// redelivering them can never succeed.
    pub fn deserialize_value<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        match &self.payload {
            Some(payload) => serde_json::from_str(payload)
                .map_err(|e| BookingError::Poison(format!("Unparseable message body: {}", e))),
            None => Err(BookingError::Poison("Empty message payload".to_string())),
        }
    }
}
