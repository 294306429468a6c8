use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_ca_location: Option<String>,
    pub additional_properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            additional_properties: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub notifications_topic: String,
    pub dead_letter_topic: String,
    /// Maximum messages handed to the consumer per invocation.
    pub batch_size: usize,
    pub receive_wait_ms: u64,
    pub send_timeout_ms: u64,
    /// Redeliveries allowed before a message is dead-lettered. Policy
    /// parameter, deliberately not a constant.
    pub max_redeliveries: u32,
    pub redelivery_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            notifications_topic: "notifications.booking".to_string(),
            dead_letter_topic: "notifications.booking.dlq".to_string(),
            batch_size: 10,
            receive_wait_ms: 1_000,
            send_timeout_ms: 10_000,
            max_redeliveries: 5,
            redelivery_backoff_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: String,
    /// Table identifier; becomes the store directory under `data_dir`.
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/event-booking".to_string(),
            table: "bookings".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn table_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.table)
    }

    /// Scratch directory for a service following the table as a
    /// read-only secondary.
    pub fn secondary_path(&self, service_name: &str) -> PathBuf {
        Path::new(&self.data_dir).join(format!("{}-{}", self.table, service_name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(skip)]
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
}

impl ServiceConfig {
    /// Layered load: optional config file, then `BOOKING__`-prefixed
    /// environment variables (e.g. `BOOKING__QUEUE__NOTIFICATIONS_TOPIC`,
    /// `BOOKING__STORE__TABLE`, `BOOKING__ENVIRONMENT`).
    pub fn load(service_name: &str, config_file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BOOKING")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: ServiceConfig = builder.build()?.try_deserialize()?;
        loaded.service_name = service_name.to_string();
        if loaded.environment.is_empty() {
            loaded.environment = "dev".to_string();
        }
        Ok(loaded)
    }

    /// Consumer group and client ids are namespaced by environment; the
    /// environment name has no behavioral effect beyond naming.
    pub fn group_id(&self) -> String {
        format!("{}-{}", self.service_name, self.environment)
    }

    pub fn to_kafka_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config.set("bootstrap.servers", &self.kafka.bootstrap_servers);
        config.set("group.id", self.group_id());
        config.set("client.id", self.group_id());
        config.set("auto.offset.reset", "earliest");
        // Offsets are committed per message after its outcome is settled.
        config.set("enable.auto.commit", "false");

        if let Some(security_protocol) = &self.kafka.security_protocol {
            config.set("security.protocol", security_protocol);
        }

        if let Some(sasl_mechanism) = &self.kafka.sasl_mechanism {
            config.set("sasl.mechanism", sasl_mechanism);
        }

        if let Some(sasl_username) = &self.kafka.sasl_username {
            config.set("sasl.username", sasl_username);
        }

        if let Some(sasl_password) = &self.kafka.sasl_password {
            config.set("sasl.password", sasl_password);
        }

        if let Some(ssl_ca_location) = &self.kafka.ssl_ca_location {
            config.set("ssl.ca.location", ssl_ca_location);
        }

        for (key, value) in &self.kafka.additional_properties {
            config.set(key, value);
        }

        config
    }
}
