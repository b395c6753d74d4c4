use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{MajordomoError, Result};
use crate::masterjob::context::MasterJobContext;
use crate::scheduler::{Schedule, ScheduleCallback};

/// Future returned by a master job action.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// The periodic action a master job runs while this instance is master.
pub type JobAction = Arc<dyn Fn(Arc<Schedule>) -> JobFuture + Send + Sync>;

/// Optional hook invoked when a job is activated or deactivated. Hook
/// failures are logged with the job identity and never abort the
/// activation of sibling jobs.
pub type JobHook = Arc<dyn Fn(&Schedule) -> Result<()> + Send + Sync>;

/// A registered master job: the schedule plus the action and lifecycle
/// hooks. Owned by the context; created at registration and destroyed
/// when the service is torn down.
pub struct MasterJobHolder {
    pub name: String,
    pub schedule: Arc<Schedule>,
    pub action: JobAction,
    pub on_activate: Option<JobHook>,
    pub on_deactivate: Option<JobHook>,
}

impl std::fmt::Debug for MasterJobHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterJobHolder")
            .field("name", &self.name)
            .field("schedule", &self.schedule.id())
            .finish()
    }
}

/// Builder for registering a master job with a service.
pub struct MasterJob {
    name: String,
    frequency: Duration,
    initial_wait: Duration,
    action: JobAction,
    on_activate: Option<JobHook>,
    on_deactivate: Option<JobHook>,
}

impl MasterJob {
    pub fn new<F, Fut>(name: impl Into<String>, frequency: Duration, action: F) -> Self
    where
        F: Fn(Arc<Schedule>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            frequency,
            initial_wait: Duration::ZERO,
            action: Arc::new(move |schedule| Box::pin(action(schedule))),
            on_activate: None,
            on_deactivate: None,
        }
    }

    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    pub fn on_activate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Schedule) -> Result<()> + Send + Sync + 'static,
    {
        self.on_activate = Some(Arc::new(hook));
        self
    }

    pub fn on_deactivate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Schedule) -> Result<()> + Send + Sync + 'static,
    {
        self.on_deactivate = Some(Arc::new(hook));
        self
    }

    pub(crate) fn into_holder(self) -> MasterJobHolder {
        let schedule = Arc::new(
            Schedule::new(self.name.clone(), self.frequency).with_initial_wait(self.initial_wait),
        );
        MasterJobHolder {
            name: self.name,
            schedule,
            action: self.action,
            on_activate: self.on_activate,
            on_deactivate: self.on_deactivate,
        }
    }
}

/// Scheduler callback that dispatches a firing to its holder.
///
/// The holder is looked up by schedule id under a read lock. A missing
/// holder means the job was unregistered while this firing was in flight;
/// that race is benign and the firing is silently dropped. Action errors
/// are logged with the job name and propagated to the scheduler.
pub(crate) fn execution_callback(context: Arc<RwLock<MasterJobContext>>) -> ScheduleCallback {
    Arc::new(move |schedule, _cancel| {
        let context = context.clone();
        Box::pin(async move {
            let entry = {
                let ctx = context.read().await;
                ctx.jobs
                    .get(&schedule.id())
                    .map(|holder| (holder.name.clone(), holder.action.clone()))
            };
            let Some((name, action)) = entry else {
                return Ok(());
            };

            if let Err(e) = action(schedule).await {
                tracing::error!(job = %name, error = %e, "Master job execution failed");
                return Err(MajordomoError::JobFailed(name, e.to_string()));
            }
            Ok(())
        })
    })
}
