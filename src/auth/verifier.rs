//! API key verification
//!
//! Hashes the presented secret, looks it up in the credential store and runs
//! the key through its policy checks. Unknown hashes are remembered for a
//! short while so that a client hammering with a bad key does not reach the
//! store on every request.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::key::{hash_api_key, ApiKey, KeyUsage};
use super::store::{CredentialStore, CredentialStoreError};
use crate::envelope::TenantId;

/// Longest credential accepted before hashing
pub const MAX_CREDENTIAL_LEN: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No API key presented")]
    MissingCredential,

    #[error("Malformed API key")]
    MalformedCredential,

    #[error("Unknown API key")]
    UnknownKey,

    #[error("API key is disabled")]
    Disabled,

    #[error("API key has expired")]
    Expired,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Usage exhausted")]
    UsageExhausted,

    #[error("API key is not bound to a tenant")]
    TenantUnresolved,

    #[error(transparent)]
    CredentialStore(#[from] CredentialStoreError),
}

impl AuthError {
    /// True when the failure is on our side rather than the caller's.
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::CredentialStore(_))
    }
}

/// Outcome of verifying a credential
#[derive(Debug)]
pub enum Verification {
    Valid { key_id: String, tenant_id: TenantId },
    Invalid(AuthError),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Verification::Valid { tenant_id, .. } => Some(tenant_id),
            Verification::Invalid(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&AuthError> {
        match self {
            Verification::Valid { .. } => None,
            Verification::Invalid(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// How long an unknown key hash is remembered
    pub negative_cache_ttl: Duration,
    pub negative_cache_capacity: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            negative_cache_ttl: Duration::from_secs(30),
            negative_cache_capacity: 10_000,
        }
    }
}

pub struct KeyVerifier {
    store: Arc<dyn CredentialStore>,
    unknown_keys: Cache<String, ()>,
}

impl KeyVerifier {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_config(store, VerifierConfig::default())
    }

    pub fn with_config(store: Arc<dyn CredentialStore>, config: VerifierConfig) -> Self {
        let unknown_keys = Cache::builder()
            .max_capacity(config.negative_cache_capacity)
            .time_to_live(config.negative_cache_ttl)
            .build();

        Self { store, unknown_keys }
    }

    /// Verify a presented credential and resolve its tenant.
    ///
    /// Usage counters are written back in the background. A failed write
    /// is logged and never fails the request.
    pub async fn verify(&self, credential: &str) -> Verification {
        match self.verify_inner(credential).await {
            Ok((key_id, tenant_id)) => Verification::Valid { key_id, tenant_id },
            Err(err) => Verification::Invalid(err),
        }
    }

    async fn verify_inner(&self, credential: &str) -> Result<(String, TenantId), AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        if credential.len() > MAX_CREDENTIAL_LEN || credential.chars().any(char::is_whitespace) {
            return Err(AuthError::MalformedCredential);
        }

        let key_hash = hash_api_key(credential);
        if self.unknown_keys.contains_key(&key_hash) {
            return Err(AuthError::UnknownKey);
        }

        let key = match self.store.lookup(&key_hash).await? {
            Some(key) => key,
            None => {
                self.unknown_keys.insert(key_hash, ());
                return Err(AuthError::UnknownKey);
            }
        };

        let (tenant_id, usage) = evaluate(&key, Utc::now()).map_err(|err| {
            debug!(key_id = %key.id, reason = %err, "API key rejected");
            err
        })?;

        self.record_usage(key.id.clone(), usage);
        Ok((key.id, tenant_id))
    }

    fn record_usage(&self, key_id: String, usage: KeyUsage) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.record_usage(&key_id, usage).await {
                warn!(key_id = %key_id, error = %e, "Failed to record key usage");
            }
        });
    }
}

/// Apply a key's policy at time `now`.
///
/// Checks run in order: enabled, expiry, remaining budget (after any due
/// refill), rate limit window, tenant binding. On success returns the tenant
/// and the usage counters to write back.
pub fn evaluate(key: &ApiKey, now: DateTime<Utc>) -> Result<(TenantId, KeyUsage), AuthError> {
    if !key.enabled {
        return Err(AuthError::Disabled);
    }
    if key.is_expired(now) {
        return Err(AuthError::Expired);
    }

    let mut usage = key.usage.clone();

    if usage.remaining == Some(0) {
        match key.refill {
            Some(refill) => {
                let since = usage.last_refill_at.unwrap_or(key.created_at);
                if now - since >= ChronoDuration::milliseconds(refill.interval_ms) {
                    usage.remaining = Some(refill.amount);
                    usage.last_refill_at = Some(now);
                }
            }
            None => return Err(AuthError::UsageExhausted),
        }
        if usage.remaining == Some(0) {
            return Err(AuthError::UsageExhausted);
        }
    }

    if let Some(limit) = key.rate_limit {
        let in_window = usage
            .last_request
            .map(|last| now - last < ChronoDuration::milliseconds(limit.time_window_ms))
            .unwrap_or(false);

        if in_window {
            if usage.request_count >= limit.max_requests {
                return Err(AuthError::RateLimited);
            }
            usage.request_count += 1;
        } else {
            usage.request_count = 1;
        }
    } else {
        usage.request_count = usage.request_count.saturating_add(1);
    }

    let tenant_id = key.resolve_tenant().ok_or(AuthError::TenantUnresolved)?;

    if let Some(remaining) = usage.remaining.as_mut() {
        *remaining -= 1;
    }
    usage.last_request = Some(now);

    Ok((tenant_id, usage))
}
