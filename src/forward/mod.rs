//! Forwarding of ingested payloads to a downstream consumer
//!
//! Forwarding is best-effort. With no destination configured the
//! [`NoopForwarder`] accepts and discards. Otherwise payloads go through a
//! bounded [`QueueForwarder`] backed by a webhook or (feature `kafka`) Kafka
//! delivery.

#[cfg(feature = "kafka")]
pub mod kafka;
mod queue;
mod webhook;

pub use queue::{Delivery, DeliveryError, ForwardJob, ForwardStats, ForwardWorker, QueueConfig, QueueForwarder};
pub use webhook::{WebhookDelivery, TENANT_HEADER};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::TenantId;
use crate::otlp::SignalType;
use crate::sink::{ForwardError, Forwarder};

/// Forwarding disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopForwarder;

#[async_trait]
impl Forwarder for NoopForwarder {
    async fn enqueue(&self, _tenant_id: &TenantId, _signal: SignalType, _raw: Bytes) -> Result<(), ForwardError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Base URL of the downstream OTLP/HTTP receiver
    pub url: Option<String>,
    pub queue: QueueConfig,
    /// Per-request timeout for webhook delivery
    pub timeout: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            url: None,
            queue: QueueConfig::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ForwardConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parse = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok());

        Self {
            url: std::env::var("OTELGATE_FORWARD_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            queue: QueueConfig {
                capacity: parse("OTELGATE_FORWARD_QUEUE")
                    .map(|v| v as usize)
                    .unwrap_or(defaults.queue.capacity),
                max_attempts: parse("OTELGATE_FORWARD_MAX_ATTEMPTS")
                    .map(|v| v as u32)
                    .unwrap_or(defaults.queue.max_attempts),
                ..defaults.queue
            },
            timeout: parse("OTELGATE_FORWARD_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// The forwarder selected by configuration, plus its worker if it has one
pub struct ForwardingSetup {
    pub forwarder: Arc<dyn Forwarder>,
    pub queue: Option<Arc<QueueForwarder>>,
    pub worker: Option<ForwardWorker>,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardSetupError {
    #[error("Failed to build webhook client: {0}")]
    Webhook(#[from] reqwest::Error),

    #[cfg(feature = "kafka")]
    #[error("Failed to create Kafka producer: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Build the forwarder from configuration. Kafka wins over the webhook when
/// both are configured.
pub fn build_forwarder(config: &ForwardConfig) -> Result<ForwardingSetup, ForwardSetupError> {
    #[cfg(feature = "kafka")]
    if let Some(kafka_config) = kafka::KafkaForwardConfig::from_env() {
        let delivery = Arc::new(kafka::KafkaDelivery::new(kafka_config)?);
        return Ok(queued(delivery, config));
    }

    match &config.url {
        Some(url) => {
            let delivery = Arc::new(WebhookDelivery::new(url, config.timeout)?);
            tracing::info!(url = %url, "Forwarding to webhook");
            Ok(queued(delivery, config))
        }
        None => {
            tracing::info!("Forwarding disabled");
            Ok(ForwardingSetup {
                forwarder: Arc::new(NoopForwarder),
                queue: None,
                worker: None,
            })
        }
    }
}

fn queued(delivery: Arc<dyn Delivery>, config: &ForwardConfig) -> ForwardingSetup {
    let (forwarder, worker) = QueueForwarder::start(delivery, config.queue.clone());
    let queue = Arc::new(forwarder);
    ForwardingSetup {
        forwarder: queue.clone(),
        queue: Some(queue),
        worker: Some(worker),
    }
}
