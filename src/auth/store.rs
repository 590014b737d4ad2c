//! Credential store seam
//!
//! The relational store that owns API keys lives outside this process. The
//! gateway only needs a read-mostly lookup by key hash and a best-effort
//! usage update, so that is all the trait asks for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::path::Path;

use super::key::{hash_api_key, ApiKey, KeyUsage, RateLimit, Refill};
use crate::envelope::TenantId;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the key whose secret hashes to `key_hash`.
    async fn lookup(&self, key_hash: &str) -> Result<Option<ApiKey>, CredentialStoreError>;

    /// Persist updated usage counters for a key.
    async fn record_usage(&self, key_id: &str, usage: KeyUsage) -> Result<(), CredentialStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("Key '{0}' not found")]
    KeyNotFound(String),

    #[error("Failed to read keys file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid keys file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Concurrent in-memory credential store keyed by secret hash
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    by_hash: DashMap<String, ApiKey>,
    /// key id -> key hash
    ids: DashMap<String, String>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key record
    pub fn insert(&self, key: ApiKey) {
        if let Some(old_hash) = self.ids.insert(key.id.clone(), key.key_hash.clone()) {
            if old_hash != key.key_hash {
                self.by_hash.remove(&old_hash);
            }
        }
        self.by_hash.insert(key.key_hash.clone(), key);
    }

    /// Remove a key by id
    pub fn remove(&self, key_id: &str) -> Option<ApiKey> {
        let (_, hash) = self.ids.remove(key_id)?;
        self.by_hash.remove(&hash).map(|(_, key)| key)
    }

    /// Snapshot of a key's current record
    pub fn get(&self, key_id: &str) -> Option<ApiKey> {
        let hash = self.ids.get(key_id)?;
        self.by_hash.get(hash.value()).map(|k| k.clone())
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Load keys from a JSON file containing an array of [`KeySeed`].
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, CredentialStoreError> {
        let data = std::fs::read(path.as_ref())?;
        let seeds: Vec<KeySeed> = serde_json::from_slice(&data)?;
        let count = seeds.len();

        for seed in seeds {
            self.insert(seed.into_api_key());
        }

        tracing::info!(
            path = %path.as_ref().display(),
            keys = count,
            "Loaded API keys"
        );
        Ok(count)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(&self, key_hash: &str) -> Result<Option<ApiKey>, CredentialStoreError> {
        Ok(self.by_hash.get(key_hash).map(|k| k.clone()))
    }

    async fn record_usage(&self, key_id: &str, usage: KeyUsage) -> Result<(), CredentialStoreError> {
        let hash = self
            .ids
            .get(key_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| CredentialStoreError::KeyNotFound(key_id.to_string()))?;

        let mut key = self
            .by_hash
            .get_mut(&hash)
            .ok_or_else(|| CredentialStoreError::KeyNotFound(key_id.to_string()))?;
        key.usage = usage;
        Ok(())
    }
}

/// Keys file entry. Carries the plaintext secret, which is hashed on load.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySeed {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub refill: Option<Refill>,
    #[serde(default)]
    pub remaining: Option<u32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl KeySeed {
    pub fn into_api_key(self) -> ApiKey {
        ApiKey {
            id: self.id,
            name: self.name,
            key_hash: hash_api_key(&self.key),
            tenant_id: self.tenant_id,
            created_at: Utc::now(),
            expires_at: self.expires_at,
            enabled: self.enabled,
            rate_limit: self.rate_limit,
            refill: self.refill,
            usage: KeyUsage {
                remaining: self.remaining,
                ..KeyUsage::default()
            },
            metadata: self.metadata,
        }
    }
}
