use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::compression::{self, CompressionError};
use crate::envelope::TenantId;
use crate::otlp::SignalType;
use crate::sink::RecordId;

/// Fixed bookkeeping cost charged per record on top of its payload bytes
pub const RECORD_OVERHEAD_BYTES: usize = 128;

/// One persisted export request. Immutable once written.
#[derive(Debug)]
pub struct StoredRecord {
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub signal: SignalType,
    /// Receipt time, nanoseconds since the Unix epoch
    pub received_at: i64,
    /// Spans, log records or metric data points in the payload
    pub item_count: usize,
    raw_lz4: Vec<u8>,
    raw_len: usize,
    decoded_json: String,
}

impl StoredRecord {
    pub fn new(
        id: RecordId,
        tenant_id: TenantId,
        signal: SignalType,
        received_at: i64,
        raw: &[u8],
        decoded_json: String,
        item_count: usize,
    ) -> Self {
        Self {
            id,
            tenant_id,
            signal,
            received_at,
            item_count,
            raw_lz4: compression::compress(raw),
            raw_len: raw.len(),
            decoded_json,
        }
    }

    /// The original request body
    pub fn raw(&self) -> Result<Bytes, CompressionError> {
        compression::decompress(&self.raw_lz4).map(Bytes::from)
    }

    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Decoded payload as OTLP/JSON text
    pub fn decoded_json(&self) -> &str {
        &self.decoded_json
    }

    pub fn decoded(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.decoded_json)
    }

    /// Bytes charged against the store's memory limit
    pub fn memory_usage(&self) -> usize {
        self.raw_lz4.len() + self.decoded_json.len() + RECORD_OVERHEAD_BYTES
    }
}

/// Records received within one time window.
/// Covers `[start_time, end_time)` in epoch nanoseconds.
#[derive(Debug)]
pub struct TimeShard {
    pub start_time: i64,
    pub end_time: i64,
    records: RwLock<Vec<Arc<StoredRecord>>>,
    memory_bytes: AtomicUsize,
}

impl TimeShard {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
            records: RwLock::new(Vec::new()),
            memory_bytes: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, record: Arc<StoredRecord>) {
        self.memory_bytes.fetch_add(record.memory_usage(), Ordering::SeqCst);
        self.records.write().push(record);
    }

    /// Records received within `[start, end)`
    pub fn records_in_range(&self, start: i64, end: i64) -> Vec<Arc<StoredRecord>> {
        self.records
            .read()
            .iter()
            .filter(|r| r.received_at >= start && r.received_at < end)
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_bytes.load(Ordering::SeqCst)
    }
}

/// Start and end of the shard containing `timestamp`
pub fn calculate_shard_bounds(timestamp: i64, shard_duration: i64) -> (i64, i64) {
    let start = timestamp.div_euclid(shard_duration) * shard_duration;
    (start, start + shard_duration)
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub start_time: i64,
    pub end_time: i64,
    pub record_count: usize,
    pub memory_bytes: usize,
}

impl From<&TimeShard> for ShardStats {
    fn from(shard: &TimeShard) -> Self {
        Self {
            start_time: shard.start_time,
            end_time: shard.end_time,
            record_count: shard.record_count(),
            memory_bytes: shard.memory_usage(),
        }
    }
}
