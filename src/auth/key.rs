//! API key records as held by the credential store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::envelope::TenantId;

/// Metadata keys that may carry the owning organization, in lookup order.
const TENANT_METADATA_KEYS: [&str; 4] = ["organizationId", "organization_id", "tenantId", "tenant_id"];

/// Per-key request rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub time_window_ms: i64,
    pub max_requests: u32,
}

/// Periodic top-up of the remaining request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refill {
    pub interval_ms: i64,
    pub amount: u32,
}

/// Usage counters, updated best-effort after each successful verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsage {
    #[serde(default)]
    pub request_count: u32,
    /// Remaining request budget. `None` means unlimited.
    #[serde(default)]
    pub remaining: Option<u32>,
    #[serde(default)]
    pub last_request: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_refill_at: Option<DateTime<Utc>>,
}

/// An API key. Only the SHA-256 of the secret is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub key_hash: String,
    /// Owning organization
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub refill: Option<Refill>,
    #[serde(default)]
    pub usage: KeyUsage,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ApiKey {
    /// Create an enabled, non-expiring key for `secret`.
    pub fn new(id: impl Into<String>, secret: &str) -> Self {
        Self {
            id: id.into(),
            name: None,
            key_hash: hash_api_key(secret),
            tenant_id: None,
            created_at: Utc::now(),
            expires_at: None,
            enabled: true,
            rate_limit: None,
            refill: None,
            usage: KeyUsage::default(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_rate_limit(mut self, time_window_ms: i64, max_requests: u32) -> Self {
        self.rate_limit = Some(RateLimit {
            time_window_ms,
            max_requests,
        });
        self
    }

    pub fn with_remaining(mut self, remaining: u32) -> Self {
        self.usage.remaining = Some(remaining);
        self
    }

    pub fn with_refill(mut self, interval_ms: i64, amount: u32) -> Self {
        self.refill = Some(Refill { interval_ms, amount });
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Resolve the owning tenant.
    ///
    /// Returns `None` if no tenant is bound, or if the tenant attribute and
    /// the metadata name different tenants.
    pub fn resolve_tenant(&self) -> Option<TenantId> {
        let from_metadata = TENANT_METADATA_KEYS
            .iter()
            .filter_map(|key| self.metadata.get(*key))
            .filter_map(|value| value.as_str())
            .find_map(TenantId::new);

        match (&self.tenant_id, from_metadata) {
            (Some(bound), Some(meta)) if *bound != meta => None,
            (Some(bound), _) => Some(bound.clone()),
            (None, meta) => meta,
        }
    }
}

/// SHA-256 of an API key secret, hex encoded
pub fn hash_api_key(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
