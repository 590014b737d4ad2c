use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::memory::{MemoryStats, MemoryTracker};
use super::partition::Partition;
use super::shard::StoredRecord;
use crate::envelope::{Envelope, TenantId};
use crate::otlp::SignalType;
use crate::sink::{RecordId, StoreError, Storer};

const NANOS_PER_MILLI: i64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Memory limit across all partitions
    pub max_memory_bytes: usize,
    /// Width of each time shard in milliseconds (default: 1 hour)
    pub shard_duration_ms: i64,
    /// Records older than this are dropped by the retention worker (default: 30 days)
    pub retention_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 1024 * 1024 * 1024,
            shard_duration_ms: 3600 * 1000,
            retention_ms: 30 * 24 * 3600 * 1000,
        }
    }
}

impl StoreConfig {
    pub fn with_max_memory(mut self, max_bytes: usize) -> Self {
        self.max_memory_bytes = max_bytes;
        self
    }

    pub fn with_shard_duration(mut self, duration_ms: i64) -> Self {
        self.shard_duration_ms = duration_ms;
        self
    }

    pub fn with_retention(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }
}

/// Tenant-partitioned, append-only telemetry store
pub struct TelemetryStore {
    partitions: DashMap<(TenantId, SignalType), Arc<Partition>>,
    memory: MemoryTracker,
    next_id: AtomicU64,
    pressure_warned: AtomicBool,
    config: StoreConfig,
}

impl TelemetryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            partitions: DashMap::new(),
            memory: MemoryTracker::new(config.max_memory_bytes),
            next_id: AtomicU64::new(1),
            pressure_warned: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Push a record into its partition, creating the partition if needed.
    /// A map guard is held across the push so a concurrent retention pass
    /// cannot evict the partition while it is still empty.
    fn insert_into_partition(&self, tenant_id: &TenantId, signal: SignalType, record: Arc<StoredRecord>) {
        let key = (tenant_id.clone(), signal);
        if let Some(partition) = self.partitions.get(&key) {
            partition.value().insert(record);
            return;
        }

        let shard_duration = self.config.shard_duration_ms.saturating_mul(NANOS_PER_MILLI);
        let entry = self
            .partitions
            .entry(key)
            .or_insert_with(|| Arc::new(Partition::new(tenant_id.clone(), signal, shard_duration)));
        entry.value().insert(record);
    }

    /// Persist an envelope as a new record
    pub fn insert(&self, envelope: &Envelope) -> Result<RecordId, StoreError> {
        let decoded_json = serde_json::to_string(&envelope.payload.to_json())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let record = StoredRecord::new(
            RecordId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            envelope.tenant_id.clone(),
            envelope.signal,
            envelope.received_at_nanos(),
            &envelope.raw,
            decoded_json,
            envelope.payload.item_count(),
        );

        let size = record.memory_usage();
        if !self.memory.try_allocate(size) {
            return Err(StoreError::CapacityExceeded {
                requested: size,
                available: self.memory.available(),
            });
        }

        self.check_memory_pressure();

        let id = record.id;
        self.insert_into_partition(&envelope.tenant_id, envelope.signal, Arc::new(record));
        Ok(id)
    }

    fn check_memory_pressure(&self) {
        let under_pressure = self.memory.is_under_pressure();
        let already_warned = self.pressure_warned.swap(under_pressure, Ordering::Relaxed);
        if under_pressure && !already_warned {
            warn!(
                current_bytes = self.memory.current(),
                max_bytes = self.memory.max(),
                "Telemetry store above 80% of its memory limit"
            );
        }
    }

    /// Records for one tenant and signal received within `[start, end)`
    /// (epoch nanoseconds), oldest first
    pub fn scan(&self, tenant_id: &TenantId, signal: SignalType, start: i64, end: i64) -> Vec<Arc<StoredRecord>> {
        self.partitions
            .get(&(tenant_id.clone(), signal))
            .map(|p| p.scan(start, end))
            .unwrap_or_default()
    }

    /// Every record for one tenant and signal
    pub fn scan_all(&self, tenant_id: &TenantId, signal: SignalType) -> Vec<Arc<StoredRecord>> {
        self.scan(tenant_id, signal, i64::MIN, i64::MAX)
    }

    pub fn record_count(&self) -> usize {
        self.partitions.iter().map(|p| p.record_count()).sum()
    }

    /// Drop shards whose window ended before `now - retention`.
    /// `now` is epoch milliseconds. Returns the number of shards dropped.
    pub fn expire_old_data(&self, now_ms: i64) -> usize {
        let cutoff = now_ms
            .saturating_sub(self.config.retention_ms)
            .saturating_mul(NANOS_PER_MILLI);

        let mut expired = 0;
        for entry in self.partitions.iter() {
            let (dropped, freed) = entry.value().expire_before(cutoff);
            expired += dropped;
            self.memory.free(freed);
        }

        // Inserts hold a map guard while pushing, so an empty partition seen
        // here has no push in flight.
        self.partitions.retain(|_, p| !p.is_empty());
        expired
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats::from(&self.memory)
    }

    /// Aggregated per signal. Tenant ids are not included.
    pub fn stats(&self) -> StoreStats {
        let mut signals: Vec<SignalStats> = SignalType::ALL
            .iter()
            .map(|&signal| SignalStats {
                signal,
                partitions: 0,
                shards: 0,
                records: 0,
                bytes: 0,
            })
            .collect();

        for entry in self.partitions.iter() {
            let partition = entry.value();
            if let Some(stats) = signals.iter_mut().find(|s| s.signal == partition.signal) {
                stats.partitions += 1;
                stats.shards += partition.shard_count();
                stats.records += partition.record_count();
                stats.bytes += partition.memory_usage();
            }
        }

        StoreStats {
            memory: self.memory_stats(),
            signals,
        }
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[async_trait]
impl Storer for TelemetryStore {
    async fn append(&self, envelope: &Envelope) -> Result<RecordId, StoreError> {
        self.insert(envelope)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalStats {
    pub signal: SignalType,
    pub partitions: usize,
    pub shards: usize,
    pub records: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub memory: MemoryStats,
    pub signals: Vec<SignalStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otlp::{synthetic, DecodedPayload};
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use prost::Message;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn trace_envelope(tenant_id: &str) -> Envelope {
        let request = synthetic::trace_export("checkout", 2, 1_700_000_000_000_000_000);
        let raw = Bytes::from(request.encode_to_vec());
        Envelope::new(tenant(tenant_id), raw, DecodedPayload::Traces(request))
    }

    fn log_envelope(tenant_id: &str) -> Envelope {
        let request = synthetic::log_export("checkout", 3, 1_700_000_000_000_000_000);
        let raw = Bytes::from(request.encode_to_vec());
        Envelope::new(tenant(tenant_id), raw, DecodedPayload::Logs(request))
    }

    #[test]
    fn test_insert_and_scan() {
        let store = TelemetryStore::default();
        let envelope = trace_envelope("org_42");
        let id = store.insert(&envelope).unwrap();

        let records = store.scan_all(&tenant("org_42"), SignalType::Traces);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.id, id);
        assert_eq!(record.tenant_id, tenant("org_42"));
        assert_eq!(record.signal, SignalType::Traces);
        assert_eq!(record.item_count, 2);
        assert_eq!(record.received_at, envelope.received_at_nanos());
        assert_eq!(record.raw().unwrap(), envelope.raw);

        let decoded = record.decoded().unwrap();
        assert_eq!(decoded, envelope.payload.to_json());
    }

    #[test]
    fn test_tenant_isolation() {
        let store = TelemetryStore::default();
        store.insert(&trace_envelope("org_1")).unwrap();
        store.insert(&trace_envelope("org_2")).unwrap();
        store.insert(&log_envelope("org_1")).unwrap();

        assert_eq!(store.scan_all(&tenant("org_1"), SignalType::Traces).len(), 1);
        assert_eq!(store.scan_all(&tenant("org_1"), SignalType::Logs).len(), 1);
        assert_eq!(store.scan_all(&tenant("org_2"), SignalType::Traces).len(), 1);
        assert!(store.scan_all(&tenant("org_2"), SignalType::Logs).is_empty());
        assert!(store.scan_all(&tenant("org_3"), SignalType::Metrics).is_empty());
    }

    #[test]
    fn test_no_deduplication() {
        let store = TelemetryStore::default();
        let envelope = trace_envelope("org_42");
        let first = store.insert(&envelope).unwrap();
        let second = store.insert(&envelope).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.scan_all(&tenant("org_42"), SignalType::Traces).len(), 2);
    }

    #[test]
    fn test_scan_time_range() {
        let store = TelemetryStore::default();
        let mut envelope = trace_envelope("org_42");

        for secs in [10, 20, 30] {
            envelope.received_at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
            store.insert(&envelope).unwrap();
        }

        let start = (1_700_000_015i64) * 1_000_000_000;
        let end = (1_700_000_030i64) * 1_000_000_000;
        let records = store.scan(&tenant("org_42"), SignalType::Traces, start, end);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].received_at, 1_700_000_020 * 1_000_000_000);
    }

    #[test]
    fn test_capacity_exceeded() {
        let store = TelemetryStore::new(StoreConfig::default().with_max_memory(64));
        let result = store.insert(&trace_envelope("org_42"));

        assert!(matches!(result, Err(StoreError::CapacityExceeded { .. })));
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_expire_old_data() {
        let store = TelemetryStore::new(
            StoreConfig::default()
                .with_shard_duration(1000)
                .with_retention(60_000),
        );
        let mut envelope = trace_envelope("org_42");

        let now = Utc::now();
        envelope.received_at = now - chrono::Duration::minutes(5);
        store.insert(&envelope).unwrap();
        envelope.received_at = now;
        store.insert(&envelope).unwrap();

        let before = store.memory_stats().current_bytes;
        let expired = store.expire_old_data(now.timestamp_millis());

        assert_eq!(expired, 1);
        assert_eq!(store.record_count(), 1);
        assert!(store.memory_stats().current_bytes < before);
    }

    #[test]
    fn test_insert_survives_concurrent_retention() {
        let store = TelemetryStore::default();
        let done = AtomicBool::new(false);
        let tenants: Vec<String> = (0..500).map(|i| format!("org_{}", i)).collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    store.expire_old_data(Utc::now().timestamp_millis());
                }
            });
            s.spawn(|| {
                for id in &tenants {
                    store.insert(&trace_envelope(id)).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });
        });

        for id in &tenants {
            assert_eq!(store.scan_all(&tenant(id), SignalType::Traces).len(), 1, "lost record for {}", id);
        }
        assert_eq!(store.record_count(), tenants.len());
        let stored: usize = store.stats().signals.iter().map(|s| s.bytes).sum();
        assert_eq!(store.memory_stats().current_bytes, stored);
    }

    #[test]
    fn test_reinsert_after_partition_emptied() {
        let store = TelemetryStore::new(StoreConfig::default().with_retention(60_000));
        let mut envelope = trace_envelope("org_42");
        let now = Utc::now();

        envelope.received_at = now - chrono::Duration::days(1);
        store.insert(&envelope).unwrap();
        store.expire_old_data(now.timestamp_millis());
        assert_eq!(store.stats().signals.iter().map(|s| s.partitions).sum::<usize>(), 0);

        envelope.received_at = now;
        store.insert(&envelope).unwrap();
        assert_eq!(store.scan_all(&tenant("org_42"), SignalType::Traces).len(), 1);
    }

    #[test]
    fn test_memory_pressure_flag_tracks_usage() {
        let envelope = trace_envelope("org_42");
        let record_size = {
            let sizing = TelemetryStore::default();
            sizing.insert(&envelope).unwrap();
            sizing.memory_stats().current_bytes
        };

        let store = TelemetryStore::new(StoreConfig::default().with_max_memory(record_size + record_size / 10));
        assert!(!store.pressure_warned.load(Ordering::Relaxed));

        store.insert(&envelope).unwrap();
        assert!(store.pressure_warned.load(Ordering::Relaxed));
    }

    #[test]
    fn test_stats_per_signal() {
        let store = TelemetryStore::default();
        store.insert(&trace_envelope("org_1")).unwrap();
        store.insert(&trace_envelope("org_2")).unwrap();
        store.insert(&log_envelope("org_1")).unwrap();

        let stats = store.stats();
        let traces = stats.signals.iter().find(|s| s.signal == SignalType::Traces).unwrap();
        assert_eq!(traces.partitions, 2);
        assert_eq!(traces.records, 2);

        let metrics = stats.signals.iter().find(|s| s.signal == SignalType::Metrics).unwrap();
        assert_eq!(metrics.records, 0);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(!json.contains("org_1"));
    }
}
