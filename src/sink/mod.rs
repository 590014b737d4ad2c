//! Storage and forwarding capabilities, and the writer that drives both
//!
//! Persistence is the durability guarantee. Forwarding is best-effort
//! fan-out to a downstream consumer. Either side can be swapped out without
//! touching the gateway.

mod writer;

pub use writer::{DualSinkWriter, WriteError, WriteReceipt, WriterStats};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

use crate::envelope::{Envelope, TenantId};
use crate::otlp::SignalType;

/// Identifier assigned to a persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only telemetry persistence
#[async_trait]
pub trait Storer: Send + Sync {
    /// Persist one envelope as a new immutable record. Never deduplicates.
    async fn append(&self, envelope: &Envelope) -> Result<RecordId, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store capacity exceeded: {requested} bytes requested, {available} available")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("Failed to serialize record: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort hand-off to a downstream consumer
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Accept a raw payload for later delivery. Must not wait on delivery.
    async fn enqueue(&self, tenant_id: &TenantId, signal: SignalType, raw: Bytes) -> Result<(), ForwardError>;

    /// Short name for logs and stats
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Forwarding queue is full")]
    QueueFull,

    #[error("Forwarder is shut down")]
    Closed,

    #[error("Downstream rejected payload: {0}")]
    Rejected(String),
}
