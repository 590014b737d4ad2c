//! Bounded in-process forwarding queue
//!
//! `enqueue` never waits: a full queue rejects the job. A single background
//! worker hands jobs to a [`Delivery`] and retries with exponential backoff.
//! A job that still fails after the last attempt is dropped and logged, so
//! forwarding is at-most-once past that point.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::envelope::TenantId;
use crate::otlp::SignalType;
use crate::sink::{ForwardError, Forwarder};

/// One payload waiting for delivery
#[derive(Debug, Clone)]
pub struct ForwardJob {
    pub tenant_id: TenantId,
    pub signal: SignalType,
    pub raw: Bytes,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Downstream returned status {0}")]
    Status(u16),
}

impl DeliveryError {
    /// Client errors other than 408 and 429 will fail the same way again
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Status(code) => !(400..500).contains(code) || *code == 408 || *code == 429,
        }
    }
}

/// Transport that moves a job to the downstream consumer
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    async fn deliver(&self, job: &ForwardJob) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    /// Attempts per job including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    /// Delay before retry number `retry` (1-based)
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForwardStats {
    pub delivery: &'static str,
    pub enqueued: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
    pub queue_depth: usize,
}

pub struct QueueForwarder {
    tx: mpsc::Sender<ForwardJob>,
    capacity: usize,
    delivery_name: &'static str,
    stats: Arc<Counters>,
}

/// Stops the delivery worker
pub struct ForwardWorker {
    shutdown_tx: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl ForwardWorker {
    /// Signal the worker and wait for it to drain the queue
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Forwarding worker panicked");
        }
    }
}

impl QueueForwarder {
    /// Create the queue and spawn its delivery worker
    pub fn start(delivery: Arc<dyn Delivery>, config: QueueConfig) -> (Self, ForwardWorker) {
        let capacity = config.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let stats = Arc::new(Counters::default());

        let forwarder = Self {
            tx,
            capacity,
            delivery_name: delivery.name(),
            stats: Arc::clone(&stats),
        };

        let handle = tokio::spawn(run_worker(delivery, config, rx, shutdown_rx, stats));

        (forwarder, ForwardWorker { shutdown_tx, handle })
    }

    pub fn stats(&self) -> ForwardStats {
        ForwardStats {
            delivery: self.delivery_name,
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            queue_depth: self.capacity - self.tx.capacity(),
        }
    }
}

#[async_trait]
impl Forwarder for QueueForwarder {
    async fn enqueue(&self, tenant_id: &TenantId, signal: SignalType, raw: Bytes) -> Result<(), ForwardError> {
        let job = ForwardJob {
            tenant_id: tenant_id.clone(),
            signal,
            raw,
            enqueued_at: Utc::now(),
        };

        match self.tx.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(ForwardError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(ForwardError::Closed)
            }
        }
    }

    fn name(&self) -> &'static str {
        self.delivery_name
    }
}

async fn run_worker(
    delivery: Arc<dyn Delivery>,
    config: QueueConfig,
    mut rx: mpsc::Receiver<ForwardJob>,
    mut shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Counters>,
) {
    tracing::info!(
        delivery = delivery.name(),
        capacity = config.capacity,
        max_attempts = config.max_attempts,
        "Forwarding worker started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Forwarding worker shutting down");
                break;
            }
            job = rx.recv() => match job {
                Some(job) => deliver_with_retry(delivery.as_ref(), &config, &job, &stats).await,
                None => break,
            },
        }
    }

    // Drain whatever was accepted before shutdown, one attempt each
    rx.close();
    let drain = QueueConfig {
        max_attempts: 1,
        ..config
    };
    while let Some(job) = rx.recv().await {
        deliver_with_retry(delivery.as_ref(), &drain, &job, &stats).await;
    }

    tracing::info!("Forwarding worker stopped");
}

async fn deliver_with_retry(delivery: &dyn Delivery, config: &QueueConfig, job: &ForwardJob, stats: &Counters) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match delivery.deliver(job).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    tenant_id = %job.tenant_id,
                    signal = %job.signal,
                    attempt,
                    "Forwarded payload"
                );
                return;
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = config.backoff(attempt);
                stats.retried.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    tenant_id = %job.tenant_id,
                    signal = %job.signal,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Forward attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tenant_id = %job.tenant_id,
                    signal = %job.signal,
                    attempts = attempt,
                    bytes = job.raw.len(),
                    error = %e,
                    "Dropping forward job; downstream will not receive this payload"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` attempts, then succeeds
    struct FlakyDelivery {
        failures: u32,
        error_status: Option<u16>,
        attempts: AtomicU32,
        delivered: Mutex<Vec<ForwardJob>>,
    }

    impl FlakyDelivery {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                error_status: None,
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Delivery for FlakyDelivery {
        async fn deliver(&self, job: &ForwardJob) -> Result<(), DeliveryError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(match self.error_status {
                    Some(code) => DeliveryError::Status(code),
                    None => DeliveryError::Transport("connection refused".into()),
                });
            }
            self.delivered.lock().push(job.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            capacity: 16,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("org_42").unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = QueueConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(DeliveryError::Transport("reset".into()).is_retryable());
        assert!(DeliveryError::Status(503).is_retryable());
        assert!(DeliveryError::Status(429).is_retryable());
        assert!(!DeliveryError::Status(400).is_retryable());
        assert!(!DeliveryError::Status(413).is_retryable());
    }

    #[tokio::test]
    async fn test_delivers_after_retries() {
        let delivery = Arc::new(FlakyDelivery::new(2));
        let (forwarder, worker) = QueueForwarder::start(delivery.clone(), fast_config());

        forwarder
            .enqueue(&tenant(), SignalType::Logs, Bytes::from_static(b"payload"))
            .await
            .unwrap();

        for _ in 0..100 {
            if forwarder.stats().delivered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        worker.shutdown().await;

        assert_eq!(forwarder.stats().retried, 2);
        let delivered = delivery.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].tenant_id, tenant());
        assert_eq!(delivered[0].signal, SignalType::Logs);
        assert_eq!(&delivered[0].raw[..], b"payload");
    }

    #[tokio::test]
    async fn test_drops_after_last_attempt() {
        let delivery = Arc::new(FlakyDelivery::new(u32::MAX));
        let (forwarder, worker) = QueueForwarder::start(delivery.clone(), fast_config());

        forwarder
            .enqueue(&tenant(), SignalType::Traces, Bytes::from_static(b"payload"))
            .await
            .unwrap();

        // Let the worker pick the job up before shutdown switches to single attempts
        for _ in 0..100 {
            if forwarder.stats().dropped == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        worker.shutdown().await;

        let stats = forwarder.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.delivered, 0);
        assert_eq!(delivery.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let delivery = Arc::new(FlakyDelivery {
            error_status: Some(400),
            ..FlakyDelivery::new(1)
        });
        let (forwarder, worker) = QueueForwarder::start(delivery.clone(), fast_config());

        forwarder
            .enqueue(&tenant(), SignalType::Metrics, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        worker.shutdown().await;

        assert_eq!(delivery.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(forwarder.stats().dropped, 1);
    }

    struct SlowDelivery;

    #[async_trait]
    impl Delivery for SlowDelivery {
        async fn deliver(&self, _job: &ForwardJob) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let (forwarder, _worker) = QueueForwarder::start(
            Arc::new(SlowDelivery),
            QueueConfig {
                capacity: 1,
                ..fast_config()
            },
        );

        let mut full = 0;
        for _ in 0..3 {
            if let Err(ForwardError::QueueFull) = forwarder
                .enqueue(&tenant(), SignalType::Logs, Bytes::from_static(b"a"))
                .await
            {
                full += 1;
            }
        }

        assert!(full >= 1);
        assert_eq!(forwarder.stats().rejected, full);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let (forwarder, worker) = QueueForwarder::start(Arc::new(FlakyDelivery::new(0)), fast_config());
        worker.shutdown().await;

        let result = forwarder
            .enqueue(&tenant(), SignalType::Logs, Bytes::from_static(b"a"))
            .await;
        assert!(matches!(result, Err(ForwardError::Closed)));
        assert_eq!(forwarder.stats().rejected, 1);
    }
}
