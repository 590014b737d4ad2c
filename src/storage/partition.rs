use parking_lot::RwLock;
use std::sync::Arc;

use super::shard::{calculate_shard_bounds, ShardStats, StoredRecord, TimeShard};
use crate::envelope::TenantId;
use crate::otlp::SignalType;

/// All records of one signal type for one tenant, split into time shards
#[derive(Debug)]
pub struct Partition {
    pub tenant_id: TenantId,
    pub signal: SignalType,
    shard_duration: i64,
    /// Ordered by start time
    shards: RwLock<Vec<Arc<TimeShard>>>,
}

impl Partition {
    pub fn new(tenant_id: TenantId, signal: SignalType, shard_duration: i64) -> Self {
        Self {
            tenant_id,
            signal,
            shard_duration: shard_duration.max(1),
            shards: RwLock::new(Vec::new()),
        }
    }

    pub fn insert(&self, record: Arc<StoredRecord>) {
        self.get_or_create_shard(record.received_at).push(record);
    }

    fn get_or_create_shard(&self, timestamp: i64) -> Arc<TimeShard> {
        let (start, end) = calculate_shard_bounds(timestamp, self.shard_duration);

        {
            let shards = self.shards.read();
            if let Some(shard) = shards.iter().find(|s| s.start_time == start) {
                return Arc::clone(shard);
            }
        }

        let mut shards = self.shards.write();

        // Another writer may have created it in between
        if let Some(shard) = shards.iter().find(|s| s.start_time == start) {
            return Arc::clone(shard);
        }

        let shard = Arc::new(TimeShard::new(start, end));
        let pos = shards.partition_point(|s| s.start_time < start);
        shards.insert(pos, Arc::clone(&shard));
        shard
    }

    /// Records received within `[start, end)`, oldest first
    pub fn scan(&self, start: i64, end: i64) -> Vec<Arc<StoredRecord>> {
        let shards: Vec<Arc<TimeShard>> = self
            .shards
            .read()
            .iter()
            .filter(|s| s.start_time < end && s.end_time > start)
            .cloned()
            .collect();

        let mut records: Vec<Arc<StoredRecord>> = shards
            .iter()
            .flat_map(|s| s.records_in_range(start, end))
            .collect();
        records.sort_by_key(|r| (r.received_at, r.id));
        records
    }

    /// Drop shards that ended at or before `cutoff`. Returns the dropped
    /// shard count and the bytes they held.
    pub fn expire_before(&self, cutoff: i64) -> (usize, usize) {
        let mut shards = self.shards.write();
        let mut freed = 0;
        let before = shards.len();
        shards.retain(|s| {
            if s.end_time <= cutoff {
                freed += s.memory_usage();
                false
            } else {
                true
            }
        });
        (before - shards.len(), freed)
    }

    pub fn record_count(&self) -> usize {
        self.shards.read().iter().map(|s| s.record_count()).sum()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.read().len()
    }

    pub fn memory_usage(&self) -> usize {
        self.shards.read().iter().map(|s| s.memory_usage()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.read().is_empty()
    }

    pub fn shard_stats(&self) -> Vec<ShardStats> {
        self.shards.read().iter().map(|s| ShardStats::from(s.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordId;

    fn partition() -> Partition {
        Partition::new(TenantId::new("org_1").unwrap(), SignalType::Traces, 1000)
    }

    fn record(id: u64, received_at: i64) -> Arc<StoredRecord> {
        Arc::new(StoredRecord::new(
            RecordId(id),
            TenantId::new("org_1").unwrap(),
            SignalType::Traces,
            received_at,
            b"payload",
            "{}".to_string(),
            1,
        ))
    }

    #[test]
    fn test_insert_creates_sorted_shards() {
        let partition = partition();
        partition.insert(record(1, 2500));
        partition.insert(record(2, 500));
        partition.insert(record(3, 1500));
        partition.insert(record(4, 1600));

        assert_eq!(partition.shard_count(), 3);
        assert_eq!(partition.record_count(), 4);

        let starts: Vec<i64> = partition.shard_stats().iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![0, 1000, 2000]);
    }

    #[test]
    fn test_scan_orders_by_receipt_time() {
        let partition = partition();
        partition.insert(record(1, 1700));
        partition.insert(record(2, 300));
        partition.insert(record(3, 1200));

        let ids: Vec<u64> = partition.scan(0, 2000).iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let ids: Vec<u64> = partition.scan(1000, 1500).iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_expire_before() {
        let partition = partition();
        for i in 0..5 {
            partition.insert(record(i as u64, i * 1000 + 10));
        }
        let held = partition.memory_usage();

        let (dropped, freed) = partition.expire_before(2000);
        assert_eq!(dropped, 2);
        assert_eq!(freed, held * 2 / 5);
        assert_eq!(partition.record_count(), 3);
    }
}
