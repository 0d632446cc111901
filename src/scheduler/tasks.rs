//! Single-flight task queue.
//!
//! Every piece of background work runs as a named task. Only one task body is
//! in flight at a time; further submissions wait in FIFO order or are dropped
//! when the [`ConflictPolicy`] says an already scheduled task makes them
//! redundant. A task is finished when its future resolves. A panicking body is
//! caught and counts as finished, so the queue never stalls.

use futures_util::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error};

/// Fetches cards for a new location fix.
pub const TASK_UPDATE_CARDS: &str = "update-cards";

/// Records a user dismissal and tries to send it.
pub const TASK_DISMISS_CARD: &str = "dismiss-card";

/// Opens the URL behind a clicked card.
pub const TASK_CARD_CLICKED: &str = "card-clicked";

/// Resends pending dismissals after a failure.
pub const TASK_RETRY_DISMISS: &str = "retry-dismiss";

/// Resets state on startup or install.
pub const TASK_INITIALIZE: &str = "initialize";

/// Decides whether `new_task` is redundant given an already scheduled task.
pub type ConflictPolicy = fn(new_task: &str, scheduled_task: &str) -> bool;

/// Conflict policy of the cards service.
///
/// - a new card update is redundant next to a scheduled card update;
/// - a dismissal retry is redundant next to any task that already flushes
///   pending dismissals (card update, dismissal, dismissal retry).
pub fn are_tasks_conflicting(new_task: &str, scheduled_task: &str) -> bool {
    if new_task == TASK_UPDATE_CARDS && scheduled_task == TASK_UPDATE_CARDS {
        return true;
    }

    new_task == TASK_RETRY_DISMISS
        && matches!(
            scheduled_task,
            TASK_UPDATE_CARDS | TASK_DISMISS_CARD | TASK_RETRY_DISMISS
        )
}

/// What happened to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The queue was empty; the task started right away.
    Started,
    /// Another task is running; the task waits its turn.
    Queued,
    /// A scheduled task made this one redundant; it was dropped.
    Discarded,
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type TaskBody = Box<dyn FnOnce(TaskContext) -> TaskFuture + Send + 'static>;

struct QueuedTask {
    name: String,
    /// Taken when the task starts running.
    body: Option<TaskBody>,
}

struct Shared {
    conflicts: ConflictPolicy,
    /// Head is the running task.
    queue: Mutex<VecDeque<QueuedTask>>,
    idle: watch::Sender<bool>,
    errors: Arc<AtomicU64>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedTask>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Serializes named tasks. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("scheduled", &self.scheduled())
            .field("reported_errors", &self.reported_errors())
            .finish()
    }
}

impl TaskManager {
    /// Create an idle task manager with the given conflict policy.
    pub fn new(conflicts: ConflictPolicy) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                conflicts,
                queue: Mutex::new(VecDeque::new()),
                idle,
                errors: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Submit a task.
    ///
    /// Must be called from within a tokio runtime: when the queue is empty the
    /// task starts on a freshly spawned driver.
    pub fn submit<F, Fut>(&self, name: impl Into<String>, body: F) -> Admission
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let mut queue = self.shared.queue();

        if let Some(scheduled) = queue
            .iter()
            .find(|task| (self.shared.conflicts)(&name, &task.name))
        {
            debug!(task = %name, scheduled = %scheduled.name, "discarding redundant task");
            return Admission::Discarded;
        }

        let body: TaskBody = Box::new(move |ctx| Box::pin(body(ctx)));
        queue.push_back(QueuedTask {
            name: name.clone(),
            body: Some(body),
        });

        if queue.len() > 1 {
            debug!(task = %name, position = queue.len() - 1, "task queued");
            return Admission::Queued;
        }

        self.shared.idle.send_replace(false);
        drop(queue);
        tokio::spawn(drive(Arc::clone(&self.shared)));
        Admission::Started
    }

    /// Names of the running task (first) and the queued ones, in order.
    pub fn scheduled(&self) -> Vec<String> {
        self.shared
            .queue()
            .iter()
            .map(|task| task.name.clone())
            .collect()
    }

    /// Returns `true` when no task is running or queued.
    pub fn is_idle(&self) -> bool {
        *self.shared.idle.borrow()
    }

    /// Resolves once the queue has drained.
    pub async fn wait_idle(&self) {
        let mut idle = self.shared.idle.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Number of errors captured from wrapped calls and panicking tasks.
    pub fn reported_errors(&self) -> u64 {
        self.shared.errors.load(Ordering::Relaxed)
    }
}

async fn drive(shared: Arc<Shared>) {
    loop {
        let next = shared
            .queue()
            .front_mut()
            .map(|task| (task.name.clone(), task.body.take()));

        let Some((name, body)) = next else {
            shared.idle.send_replace(true);
            return;
        };

        if let Some(body) = body {
            run_task(&shared, name, body).await;
        }

        let mut queue = shared.queue();
        queue.pop_front();
        if queue.is_empty() {
            shared.idle.send_replace(true);
            return;
        }
    }
}

async fn run_task(shared: &Shared, name: String, body: TaskBody) {
    let ctx = TaskContext::new(name.clone(), Arc::clone(&shared.errors));
    let step = ctx.step.clone();
    debug!(task = %name, "task started");

    let outcome = AssertUnwindSafe(async move { body(ctx).await })
        .catch_unwind()
        .await;

    if outcome.is_err() {
        shared.errors.fetch_add(1, Ordering::Relaxed);
        let step = *step.lock().unwrap_or_else(|e| e.into_inner());
        error!(task = %name, step, "task panicked; treating it as finished");
    } else {
        debug!(task = %name, "task finished");
    }
}

/// Handle given to a running task body.
#[derive(Clone)]
pub struct TaskContext {
    task: Arc<str>,
    step: Arc<Mutex<&'static str>>,
    errors: Arc<AtomicU64>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .field("step", &self.step())
            .finish()
    }
}

impl TaskContext {
    pub(crate) fn new(task: String, errors: Arc<AtomicU64>) -> Self {
        Self {
            task: task.into(),
            step: Arc::new(Mutex::new("start")),
            errors,
        }
    }

    /// Name of the running task.
    pub fn task_name(&self) -> &str {
        &self.task
    }

    /// Record the step the task is about to perform. Shows up in error reports.
    pub fn set_step(&self, step: &'static str) {
        *self.step.lock().unwrap_or_else(|e| e.into_inner()) = step;
        debug!(task = %self.task, step, "task step");
    }

    /// Current step name.
    pub fn step(&self) -> &'static str {
        *self.step.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Await an external call, capturing its failure instead of propagating it.
    ///
    /// An `Err` or a panic is logged with the task and step, counted in
    /// [`TaskManager::reported_errors`], and turned into `None`. The task keeps
    /// running either way.
    pub async fn wrap_external_call<T, E, Fut>(&self, call: &str, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.report(call, &e.to_string());
                None
            }
            Err(_) => {
                self.report(call, "panicked");
                None
            }
        }
    }

    fn report(&self, call: &str, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!(
            task = %self.task,
            step = self.step(),
            call,
            "external call failed: {message}"
        );
    }
}
