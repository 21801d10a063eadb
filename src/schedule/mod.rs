//! Cron-driven invocation of component methods.

mod cron;
mod scheduler;

pub use cron::{validate, CronError, CronExpression, CronField, CronSyntax, Schedule};
pub(crate) use scheduler::ErasedTask;
pub use scheduler::{ProcessRole, ScheduledTaskDescriptor, TaskOptions, TaskScheduler, TaskZone, TriggerHandle};
