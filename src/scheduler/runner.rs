use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::schedule::Schedule;

/// Future returned by a scheduled callback.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A scheduled callback. Receives its own schedule (so it can rewrite the
/// frequency) and a cancellation token it should observe at await points.
pub type ScheduleCallback = Arc<dyn Fn(Arc<Schedule>, CancellationToken) -> TaskFuture + Send + Sync>;

struct ScheduleEntry {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Process-wide periodic task runner.
///
/// Each registered schedule gets its own ticking task: wait the initial
/// delay, invoke the callback, sleep the schedule's current frequency,
/// repeat. Callback errors are logged and do not cancel future firings.
pub struct Scheduler {
    entries: Mutex<HashMap<Uuid, ScheduleEntry>>,
    root: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Build a scheduler whose tasks stop when `shutdown` is cancelled.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            root: shutdown,
        }
    }

    pub fn register(&self, schedule: Arc<Schedule>, callback: ScheduleCallback) {
        let cancel = self.root.child_token();
        let id = schedule.id();
        let name = schedule.name().to_string();

        tracing::debug!(schedule = %name, %id, "Schedule registered");

        let handle = tokio::spawn(run_schedule(schedule, callback, cancel.clone()));

        let mut entries = self.entries.lock().expect("scheduler entries lock poisoned");
        entries.insert(
            id,
            ScheduleEntry {
                name,
                cancel,
                handle,
            },
        );
    }

    /// Stop future firings of a schedule. An in-flight invocation is left
    /// to observe its cancellation token and finish on its own.
    pub fn unregister(&self, id: Uuid) -> bool {
        let entry = {
            let mut entries = self.entries.lock().expect("scheduler entries lock poisoned");
            entries.remove(&id)
        };
        match entry {
            Some(entry) => {
                tracing::debug!(schedule = %entry.name, %id, "Schedule unregistered");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: Uuid) -> bool {
        self.entries
            .lock()
            .expect("scheduler entries lock poisoned")
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("scheduler entries lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every schedule and abort their ticking tasks.
    pub fn shutdown(&self) {
        self.root.cancel();
        let mut entries = self.entries.lock().expect("scheduler entries lock poisoned");
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
    }
}

async fn run_schedule(schedule: Arc<Schedule>, callback: ScheduleCallback, cancel: CancellationToken) {
    let initial_wait = schedule.initial_wait();
    if !initial_wait.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(initial_wait) => {}
            _ = cancel.cancelled() => return,
        }
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let fut = callback(schedule.clone(), cancel.clone());
        if schedule.is_long_running() {
            let name = schedule.name().to_string();
            tokio::spawn(async move {
                if let Err(e) = fut.await {
                    tracing::warn!(schedule = %name, error = %e, "Long-running task failed");
                }
            });
        } else if let Err(e) = fut.await {
            tracing::warn!(schedule = %schedule.name(), error = %e, "Scheduled task failed");
        }

        // Read after the invocation so a frequency rewritten by the
        // callback governs the gap to the next firing.
        let frequency = schedule.frequency();
        tokio::select! {
            _ = tokio::time::sleep(frequency) => {}
            _ = cancel.cancelled() => break,
        }
    }
}
