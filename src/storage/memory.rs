use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks bytes held by the telemetry store against a fixed limit
#[derive(Debug)]
pub struct MemoryTracker {
    current_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    max_bytes: usize,
}

impl MemoryTracker {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            current_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            max_bytes,
        }
    }

    /// Reserve `bytes` if it fits under the limit. Returns false otherwise.
    pub fn try_allocate(&self, bytes: usize) -> bool {
        let mut current = self.current_bytes.load(Ordering::SeqCst);
        loop {
            let new = match current.checked_add(bytes) {
                Some(new) if new <= self.max_bytes => new,
                _ => return false,
            };
            match self
                .current_bytes
                .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    self.peak_bytes.fetch_max(new, Ordering::SeqCst);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Release previously reserved bytes
    pub fn free(&self, bytes: usize) {
        let _ = self
            .current_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn current(&self) -> usize {
        self.current_bytes.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max_bytes
    }

    pub fn available(&self) -> usize {
        self.max_bytes.saturating_sub(self.current())
    }

    /// Usage as a fraction of the limit
    pub fn usage_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.current() as f64 / self.max_bytes as f64
    }

    /// More than 80% of the limit in use
    pub fn is_under_pressure(&self) -> bool {
        self.usage_ratio() > 0.8
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        // 1GB
        Self::new(1024 * 1024 * 1024)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    pub current_bytes: usize,
    pub peak_bytes: usize,
    pub max_bytes: usize,
    pub usage_ratio: f64,
}

impl From<&MemoryTracker> for MemoryStats {
    fn from(tracker: &MemoryTracker) -> Self {
        Self {
            current_bytes: tracker.current(),
            peak_bytes: tracker.peak(),
            max_bytes: tracker.max(),
            usage_ratio: tracker.usage_ratio(),
        }
    }
}
