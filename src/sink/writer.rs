use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{Forwarder, RecordId, StoreError, Storer};
use crate::envelope::Envelope;
use crate::otlp::SignalType;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub record_id: RecordId,
    /// False when forwarding degraded for this envelope
    pub forwarded: bool,
}

/// Writes each envelope to the store and the forwarder concurrently.
///
/// Only the store outcome decides success. A forwarding failure is logged
/// and counted.
pub struct DualSinkWriter {
    storer: Arc<dyn Storer>,
    forwarder: Arc<dyn Forwarder>,
    stats: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    stored: [AtomicU64; 3],
    store_failures: AtomicU64,
    forward_failures: AtomicU64,
}

fn signal_index(signal: SignalType) -> usize {
    match signal {
        SignalType::Traces => 0,
        SignalType::Logs => 1,
        SignalType::Metrics => 2,
    }
}

impl DualSinkWriter {
    pub fn new(storer: Arc<dyn Storer>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            storer,
            forwarder,
            stats: Counters::default(),
        }
    }

    pub async fn write(&self, envelope: &Envelope) -> Result<WriteReceipt, WriteError> {
        let (stored, forwarded) = tokio::join!(
            self.storer.append(envelope),
            self.forwarder
                .enqueue(&envelope.tenant_id, envelope.signal, envelope.raw.clone())
        );

        let forwarded = match forwarded {
            Ok(()) => true,
            Err(e) => {
                self.stats.forward_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tenant_id = %envelope.tenant_id,
                    signal = %envelope.signal,
                    forwarder = self.forwarder.name(),
                    error = %e,
                    "Forwarding degraded"
                );
                false
            }
        };

        match stored {
            Ok(record_id) => {
                self.stats.stored[signal_index(envelope.signal)].fetch_add(1, Ordering::Relaxed);
                debug!(
                    tenant_id = %envelope.tenant_id,
                    signal = %envelope.signal,
                    record_id = %record_id,
                    bytes = envelope.raw.len(),
                    "Stored envelope"
                );
                Ok(WriteReceipt { record_id, forwarded })
            }
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    tenant_id = %envelope.tenant_id,
                    signal = %envelope.signal,
                    error = %e,
                    "Failed to persist envelope"
                );
                Err(WriteError::StorageUnavailable(e))
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        let stored = |signal| self.stats.stored[signal_index(signal)].load(Ordering::Relaxed);
        WriterStats {
            forwarder: self.forwarder.name(),
            traces_stored: stored(SignalType::Traces),
            logs_stored: stored(SignalType::Logs),
            metrics_stored: stored(SignalType::Metrics),
            store_failures: self.stats.store_failures.load(Ordering::Relaxed),
            forward_failures: self.stats.forward_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WriterStats {
    pub forwarder: &'static str,
    pub traces_stored: u64,
    pub logs_stored: u64,
    pub metrics_stored: u64,
    pub store_failures: u64,
    pub forward_failures: u64,
}
