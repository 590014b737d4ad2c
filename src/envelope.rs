//! Per-request unit of work carried from the gateway into both sinks.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::otlp::{DecodedPayload, SignalType};

/// Identifier of the organization that owns a piece of telemetry.
///
/// Never empty. All stored records and forwarded payloads carry exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Build a tenant id, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.len() == id.len() {
            Some(Self(id))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::new(value).ok_or("tenant id must not be empty")
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Raw bytes, decoded payload and owning tenant for one export request.
///
/// The raw body always travels with the tenant id so that fields the decoder
/// does not understand are still persisted and forwarded.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub tenant_id: TenantId,
    pub signal: SignalType,
    pub raw: Bytes,
    pub payload: DecodedPayload,
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(tenant_id: TenantId, raw: Bytes, payload: DecodedPayload) -> Self {
        Self {
            tenant_id,
            signal: payload.signal(),
            raw,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Receipt time in nanoseconds since the Unix epoch.
    pub fn received_at_nanos(&self) -> i64 {
        self.received_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.received_at.timestamp_micros().saturating_mul(1_000))
    }
}
