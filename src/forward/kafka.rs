//! Kafka delivery for forwarded payloads
//!
//! Each signal goes to its own topic, `{prefix}{signal}`. The message key is
//! the tenant id so one tenant's payloads land on one partition. The raw
//! protobuf body is the message value.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `KAFKA_BROKERS`: Comma-separated list of brokers (enables Kafka forwarding)
//! - `OTELGATE_KAFKA_TOPIC_PREFIX`: Topic prefix (default: otlp_)
//! - `OTELGATE_KAFKA_MESSAGE_TIMEOUT_MS`: Producer delivery timeout (default: 5000)

use async_trait::async_trait;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};

use super::queue::{Delivery, DeliveryError, ForwardJob};
use crate::otlp::SignalType;

#[derive(Debug, Clone)]
pub struct KafkaForwardConfig {
    pub brokers: String,
    pub topic_prefix: String,
    pub message_timeout_ms: u32,
}

impl Default for KafkaForwardConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic_prefix: "otlp_".to_string(),
            message_timeout_ms: 5000,
        }
    }
}

impl KafkaForwardConfig {
    /// Returns `None` when `KAFKA_BROKERS` is unset
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS").ok()?;
        if brokers.trim().is_empty() {
            return None;
        }

        Some(Self {
            brokers,
            topic_prefix: std::env::var("OTELGATE_KAFKA_TOPIC_PREFIX")
                .unwrap_or_else(|_| "otlp_".to_string()),
            message_timeout_ms: std::env::var("OTELGATE_KAFKA_MESSAGE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
        })
    }

    pub fn topic_for(&self, signal: SignalType) -> String {
        format!("{}{}", self.topic_prefix, signal.as_str())
    }
}

pub struct KafkaDelivery {
    config: KafkaForwardConfig,
    producer: FutureProducer,
}

impl KafkaDelivery {
    pub fn new(config: KafkaForwardConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("compression.type", "lz4")
            .set("linger.ms", "5")
            .create()?;

        tracing::info!(brokers = %config.brokers, prefix = %config.topic_prefix, "Kafka producer created");
        Ok(Self { config, producer })
    }
}

#[async_trait]
impl Delivery for KafkaDelivery {
    async fn deliver(&self, job: &ForwardJob) -> Result<(), DeliveryError> {
        let topic = self.config.topic_for(job.signal);
        let headers = OwnedHeaders::new().insert(Header {
            key: "tenant_id",
            value: Some(job.tenant_id.as_str()),
        });

        let record = FutureRecord::to(&topic)
            .key(job.tenant_id.as_str())
            .payload(&job.raw[..])
            .headers(headers);

        self.producer
            .send(record, Duration::from_millis(self.config.message_timeout_ms as u64))
            .await
            .map(|_| ())
            .map_err(|(e, _)| DeliveryError::Transport(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_per_signal() {
        let config = KafkaForwardConfig::default();
        assert_eq!(config.topic_for(SignalType::Traces), "otlp_traces");
        assert_eq!(config.topic_for(SignalType::Metrics), "otlp_metrics");
    }
}
