use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Booking {booking_id} for event {event_id} already exists with a different payload")]
    Conflict {
        event_id: String,
        booking_id: String,
    },

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Store error: {0}")]
    Store(#[from] rocksdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Poison message: {0}")]
    Poison(String),

    #[error("Dependency unavailable: {0}")]
    Dependency(String),
}

impl BookingError {
    /// Infrastructure failures the caller may retry; everything else is
    /// either a client error or terminal.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            BookingError::Kafka(_)
                | BookingError::Store(_)
                | BookingError::Io(_)
                | BookingError::Dependency(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
