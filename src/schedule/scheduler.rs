//! Cron task registry gated on the process role, and the triggers that fire
//! registered methods.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Utc};
use tokio::task::JoinHandle;

use crate::container::{Component, ComponentRegistry, Instance};
use crate::dispatch::Reply;
use crate::error::HttpError;
use crate::metadata::MetadataRegistry;
use crate::schedule::{CronError, CronExpression, Schedule};

pub(crate) type ErasedTask = Arc<dyn Fn(Instance) -> Result<Reply, HttpError> + Send + Sync>;

/// Decided once per process. Only the coordinator installs triggers, so a
/// fleet of workers fires each task once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessRole {
    Coordinator,
    Worker,
}

impl ProcessRole {
    pub fn from_flag(coordinator: bool) -> Self {
        if coordinator {
            ProcessRole::Coordinator
        } else {
            ProcessRole::Worker
        }
    }

    pub fn is_coordinator(self) -> bool {
        self == ProcessRole::Coordinator
    }
}

#[derive(Clone, Debug)]
pub struct TaskOptions {
    /// `UTC`, `Local`, or a fixed offset such as `+03:00`. Defaults to UTC.
    pub timezone: Option<String>,
    /// When false the trigger is installed stopped.
    pub scheduled: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            timezone: None,
            scheduled: true,
        }
    }
}

impl TaskOptions {
    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn paused(mut self) -> Self {
        self.scheduled = false;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskZone {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl TaskZone {
    pub fn parse(tz: Option<&str>) -> Result<Self, CronError> {
        let Some(raw) = tz.map(str::trim) else {
            return Ok(TaskZone::Utc);
        };
        match raw {
            "" | "UTC" | "utc" | "Z" | "Etc/UTC" | "GMT" => Ok(TaskZone::Utc),
            "Local" | "local" => Ok(TaskZone::Local),
            other => parse_offset(other)
                .map(TaskZone::Fixed)
                .ok_or_else(|| CronError::Timezone(other.to_string())),
        }
    }

    /// First fire strictly after `after`, evaluated in this zone.
    pub fn next_fire(&self, expr: &CronExpression, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TaskZone::Utc => expr.next_after(&after),
            TaskZone::Local => expr
                .next_after(&after.with_timezone(&Local))
                .map(|t| t.with_timezone(&Utc)),
            TaskZone::Fixed(offset) => expr
                .next_after(&after.with_timezone(offset))
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// `+HH:MM`, `-HHMM` or `+HH`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (h, m) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if h > 23 || m > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

/// Control over one installed trigger.
pub struct TriggerHandle {
    running: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl TriggerHandle {
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.join.is_finished()
    }

    /// Remove the trigger for good.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.join.abort();
    }
}

pub struct ScheduledTaskDescriptor {
    pub id: String,
    pub component: String,
    pub method: String,
    pub expression: CronExpression,
    pub options: TaskOptions,
    pub zone: TaskZone,
    invoke: ErasedTask,
    trigger: Option<TriggerHandle>,
}

impl ScheduledTaskDescriptor {
    pub fn trigger(&self) -> Option<&TriggerHandle> {
        self.trigger.as_ref()
    }
}

impl fmt::Debug for ScheduledTaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTaskDescriptor")
            .field("id", &self.id)
            .field("component", &self.component)
            .field("method", &self.method)
            .field("expression", &self.expression.source())
            .field("zone", &self.zone)
            .field("active", &self.trigger.is_some())
            .finish()
    }
}

pub struct TaskScheduler {
    role: ProcessRole,
    tasks: MetadataRegistry<ScheduledTaskDescriptor>,
}

impl TaskScheduler {
    pub fn new(role: ProcessRole) -> Self {
        TaskScheduler {
            role,
            tasks: MetadataRegistry::new(),
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// Only meaningful before any task is registered.
    pub(crate) fn set_role(&mut self, role: ProcessRole) {
        self.role = role;
    }

    /// Register `C::method` on `schedule`. The schedule is validated in every
    /// process; only the coordinator keeps it. Returns the task id there.
    pub fn register<C, F>(
        &mut self,
        method: &str,
        schedule: impl Into<Schedule>,
        options: TaskOptions,
        run: F,
    ) -> Result<Option<String>, CronError>
    where
        C: Component,
        F: Fn(Arc<C>) -> Reply + Send + Sync + 'static,
    {
        let invoke: ErasedTask = Arc::new(move |instance: Instance| {
            let component = instance
                .downcast::<C>()
                .map_err(|_| HttpError::internal(format!("component {} has an unexpected type", C::name())))?;
            Ok(run(component))
        });
        self.register_erased(C::name(), method, schedule.into(), options, invoke)
    }

    pub(crate) fn register_erased(
        &mut self,
        component: &str,
        method: &str,
        schedule: Schedule,
        options: TaskOptions,
        invoke: ErasedTask,
    ) -> Result<Option<String>, CronError> {
        let expression = CronExpression::parse(&schedule.compile())?;
        let zone = TaskZone::parse(options.timezone.as_deref())?;
        if !self.role.is_coordinator() {
            tracing::debug!(component, method, "skipping task registration on worker");
            return Ok(None);
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(task = %id, component, method, expression = %expression, "registered task");
        self.tasks.put(
            &id,
            ScheduledTaskDescriptor {
                id: id.clone(),
                component: component.to_string(),
                method: method.to_string(),
                expression,
                options,
                zone,
                invoke,
                trigger: None,
            },
        );
        Ok(Some(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ScheduledTaskDescriptor> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ScheduledTaskDescriptor> {
        self.tasks.iter().map(|(_, d)| d)
    }

    /// Install a trigger for every task without one. Must run inside a tokio
    /// runtime. Returns the number of triggers installed.
    pub fn activate_all(&mut self, components: Arc<ComponentRegistry>) -> usize {
        if !self.role.is_coordinator() {
            return 0;
        }
        let mut installed = 0;
        for (_, task) in self.tasks.iter_mut() {
            if task.trigger.is_some() {
                continue;
            }
            task.trigger = Some(spawn_trigger(task, components.clone()));
            installed += 1;
        }
        tracing::info!(tasks = installed, "scheduled tasks activated");
        installed
    }

    /// Cancel every trigger.
    pub fn shutdown(&mut self) {
        for (_, task) in self.tasks.iter_mut() {
            if let Some(trigger) = task.trigger.take() {
                trigger.cancel();
            }
        }
    }
}

fn spawn_trigger(task: &ScheduledTaskDescriptor, components: Arc<ComponentRegistry>) -> TriggerHandle {
    let running = Arc::new(AtomicBool::new(task.options.scheduled));
    let flag = running.clone();
    let expression = task.expression.clone();
    let zone = task.zone;
    let id = task.id.clone();
    let component = task.component.clone();
    let method = task.method.clone();
    let invoke = task.invoke.clone();

    let join = tokio::spawn(async move {
        let mut after = Utc::now();
        loop {
            let Some(next) = zone.next_fire(&expression, after) else {
                tracing::warn!(task = %id, expression = %expression, "no further fire time");
                break;
            };
            while let Ok(remaining) = (next - Utc::now()).to_std() {
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining).await;
            }
            // Missed instants (suspended host, long stall) are skipped, not replayed.
            after = Utc::now().max(next);
            if !flag.load(Ordering::SeqCst) {
                continue;
            }
            tokio::spawn(fire(
                id.clone(),
                component.clone(),
                method.clone(),
                invoke.clone(),
                components.clone(),
            ));
        }
    });
    TriggerHandle { running, join }
}

/// Resolve the component afresh and run the method. Only deferred results
/// are awaited and logged.
async fn fire(
    id: String,
    component: String,
    method: String,
    invoke: ErasedTask,
    components: Arc<ComponentRegistry>,
) {
    let instance = match components.resolve_by_name(&component) {
        Ok(instance) => instance,
        Err(e) => {
            tracing::warn!(task = %id, error = %e, "task component unavailable");
            return;
        }
    };
    match invoke(instance) {
        Ok(Reply::Deferred(fut)) => match fut.await {
            Ok(out) => tracing::info!(task = %id, component = %component, method = %method, result = ?out, "task finished"),
            Err(e) => tracing::warn!(task = %id, component = %component, method = %method, error = %e, "task failed"),
        },
        Ok(_) => tracing::debug!(task = %id, component = %component, method = %method, "task ran"),
        Err(e) => tracing::warn!(task = %id, component = %component, method = %method, error = %e, "task failed"),
    }
}
