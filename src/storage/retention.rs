use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;

use super::engine::TelemetryStore;

/// Shortest interval between retention passes
pub const MIN_RETENTION_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically drops shards that fell out of the retention window
pub struct RetentionWorker {
    store: Arc<TelemetryStore>,
    interval: Duration,
    running: AtomicBool,
    stop: Notify,
}

impl RetentionWorker {
    /// A zero interval is raised to [`MIN_RETENTION_INTERVAL`].
    pub fn new(store: Arc<TelemetryStore>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!(
                min = ?MIN_RETENTION_INTERVAL,
                "Retention check interval of zero, using the minimum"
            );
            MIN_RETENTION_INTERVAL
        } else {
            interval
        };

        Self {
            store,
            interval,
            running: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                interval = ?self.interval,
                retention_ms = self.store.config().retention_ms,
                "Retention worker started"
            );

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {
                        let expired = run_retention(&self.store);
                        if expired > 0 {
                            tracing::info!(shards = expired, "Retention worker expired shards");
                        }
                    }
                    _ = self.stop.notified() => break,
                }
            }

            self.running.store(false, Ordering::SeqCst);
            tracing::info!("Retention worker stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run one retention pass now
pub fn run_retention(store: &TelemetryStore) -> usize {
    let now = chrono::Utc::now().timestamp_millis();
    store.expire_old_data(now)
}
