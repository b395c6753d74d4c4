use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counters for the outgoing request correlator.
///
/// Fire-and-forget: recording never affects control flow. A telemetry
/// adapter snapshots these on its own schedule.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    active: AtomicI64,
    errors: AtomicU64,
    completed: AtomicU64,
    elapsed_ms_total: AtomicU64,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_increment(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_decrement(&self, elapsed: Duration) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.elapsed_ms_total
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn error_increment(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Mean request duration over all completed requests.
    pub fn average_elapsed(&self) -> Option<Duration> {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            return None;
        }
        let total = self.elapsed_ms_total.load(Ordering::Relaxed);
        Some(Duration::from_millis(total / completed))
    }
}
