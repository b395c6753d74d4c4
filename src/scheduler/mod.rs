pub mod runner;
pub mod schedule;

pub use runner::{ScheduleCallback, Scheduler, TaskFuture};
pub use schedule::Schedule;
