//! HTTP delivery to a downstream OTLP/HTTP receiver

use async_trait::async_trait;
use std::time::Duration;

use super::queue::{Delivery, DeliveryError, ForwardJob};
use crate::otlp::PROTOBUF_CONTENT_TYPE;

/// Header carrying the owning tenant on forwarded requests
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Posts raw protobuf payloads to `{base_url}/v1/{signal}`
pub struct WebhookDelivery {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookDelivery {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, job: &ForwardJob) -> String {
        format!("{}{}", self.base_url, job.signal.path())
    }
}

#[async_trait]
impl Delivery for WebhookDelivery {
    async fn deliver(&self, job: &ForwardJob) -> Result<(), DeliveryError> {
        let url = self.url_for(job);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .header(TENANT_HEADER, job.tenant_id.as_str())
            .body(job.raw.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }

        tracing::debug!(url = %url, tenant_id = %job.tenant_id, "Webhook delivery sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
