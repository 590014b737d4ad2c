//! In-memory telemetry store
//!
//! Records are partitioned by `(tenant, signal)` and each partition is split
//! into time shards by receipt time. Payload bytes are kept LZ4-compressed
//! next to the decoded OTLP/JSON form. Old shards are dropped by the
//! [`RetentionWorker`].

mod compression;
mod engine;
mod memory;
mod partition;
mod retention;
mod shard;

pub use compression::CompressionError;
pub use engine::{SignalStats, StoreConfig, StoreStats, TelemetryStore};
pub use memory::{MemoryStats, MemoryTracker};
pub use partition::Partition;
pub use retention::{run_retention, RetentionWorker, MIN_RETENTION_INTERVAL};
pub use shard::{ShardStats, StoredRecord, TimeShard};
