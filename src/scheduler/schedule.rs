use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uuid::Uuid;

/// Descriptor for a periodic task.
///
/// The frequency is atomically rewritable: a running callback may adjust
/// the gap to its own next firing, which is how the negotiation poll
/// applies per-tick jitter.
#[derive(Debug)]
pub struct Schedule {
    id: Uuid,
    name: String,
    frequency_ms: AtomicU64,
    initial_wait: Duration,
    long_running: bool,
}

impl Schedule {
    pub fn new(name: impl Into<String>, frequency: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            frequency_ms: AtomicU64::new(frequency.as_millis() as u64),
            initial_wait: Duration::ZERO,
            long_running: false,
        }
    }

    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    /// Long-running tasks are detached by the runner rather than awaited,
    /// so a slow execution never delays the next firing.
    pub fn with_long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.frequency_ms.load(Ordering::Relaxed))
    }

    /// Rewrite the gap to the next firing. Takes effect after the current
    /// invocation returns.
    pub fn set_frequency(&self, frequency: Duration) {
        self.frequency_ms
            .store(frequency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn initial_wait(&self) -> Duration {
        self.initial_wait
    }

    pub fn is_long_running(&self) -> bool {
        self.long_running
    }
}
