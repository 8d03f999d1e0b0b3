//! Fan-out barrier with per-task timeouts.
//!
//! A [`Synchronizer`] holds an ordered list of tasks. [`Synchronizer::run`]
//! invokes every task with the same arguments and a [`Reporter`]; each task
//! reports exactly once, either synchronously or later from a spawned future.
//! When every task has reported, failed or timed out, the `on_complete` hook
//! fires once and the barrier returns to [`SyncState::Idle`].
//!
//! Hooks always run with no internal lock held, so a hook may call back into
//! the barrier, for example to [`reset`](Synchronizer::reset) it.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use thiserror::Error;
use tokio::{runtime::Handle, task::AbortHandle};
use tracing::{debug, trace, warn};

use crate::metrics;

/// Timeout applied to tasks added without one.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle of a [`Synchronizer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Accepting configuration; ready to run.
    Idle,
    /// A run is in progress.
    Running,
    /// The run was halted; call [`Synchronizer::reset`] before running again.
    Halted,
}

/// Misuse of the barrier's lifecycle.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    /// The operation needs an idle barrier.
    #[error("synchronizer is busy")]
    Busy,
    /// `run` was called while a run is in progress.
    #[error("synchronizer is already running")]
    AlreadyRunning,
    /// `run` was called on a halted barrier.
    #[error("synchronizer was halted and must be reset before running")]
    NotReset,
    /// `halt` was called with no run in progress.
    #[error("synchronizer is not running")]
    NotRunning,
    /// No task exists at the given index.
    #[error("no task at index {0}")]
    NoSuchTask(usize),
    /// Timers need a Tokio runtime.
    #[error("synchronizer must run inside a Tokio runtime")]
    NoRuntime,
}

/// Why a task failed.
pub enum Fault<E> {
    /// The task returned or reported an error.
    Error(Arc<E>),
    /// The task panicked while being invoked.
    Panic(String),
}

impl<E> Clone for Fault<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Error(error) => Self::Error(Arc::clone(error)),
            Self::Panic(message) => Self::Panic(message.clone()),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Fault<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Panic(message) => f.debug_tuple("Panic").field(message).finish(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Fault<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "{error}"),
            Self::Panic(message) => write!(f, "task panicked: {message}"),
        }
    }
}

/// Final state of one task within a run.
#[derive(Debug)]
pub enum TaskOutcome<T, E> {
    /// The task has not reported yet.
    Pending,
    /// The task reported success.
    Succeeded(T),
    /// The task failed.
    Failed(Fault<E>),
    /// The task's timer expired before it reported.
    TimedOut,
}

impl<T, E> TaskOutcome<T, E> {
    /// Whether the task has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool { !matches!(self, Self::Pending) }

    /// The success value, if any.
    #[must_use]
    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Succeeded(value) => Some(value),
            _ => None,
        }
    }
}

/// Outcomes handed to the `on_complete` hook.
#[derive(Debug)]
pub struct RunSummary<T, E> {
    /// One outcome per task, in task order.
    pub outcomes: Vec<TaskOutcome<T, E>>,
    /// Number of tasks that settled.
    pub completed: usize,
}

impl<T, E> RunSummary<T, E> {
    /// Iterate over the success values in task order.
    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(TaskOutcome::success)
    }

    /// Number of tasks that failed or timed out.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, TaskOutcome::Failed(_) | TaskOutcome::TimedOut))
            .count()
    }
}

/// A task body. Invoked once per run with the run's arguments.
pub type TaskFn<A, T, E> = Arc<dyn Fn(&A, Reporter<T, E>) -> Result<(), E> + Send + Sync>;

type CompleteHook<T, E> = Arc<dyn Fn(&RunSummary<T, E>) + Send + Sync>;
type FailHook<E> = Arc<dyn Fn(usize, &Fault<E>) + Send + Sync>;
type HaltHook = Arc<dyn Fn() + Send + Sync>;
type TimeoutHook = Arc<dyn Fn(usize) + Send + Sync>;

struct Hooks<T, E> {
    on_complete: Option<CompleteHook<T, E>>,
    on_fail: Option<FailHook<E>>,
    on_halt: Option<HaltHook>,
    on_timeout: Option<TimeoutHook>,
}

impl<T, E> Default for Hooks<T, E> {
    fn default() -> Self {
        Self {
            on_complete: None,
            on_fail: None,
            on_halt: None,
            on_timeout: None,
        }
    }
}

struct Shared<T, E> {
    state: SyncState,
    epoch: u64,
    outcomes: Vec<TaskOutcome<T, E>>,
    timers: Vec<Option<AbortHandle>>,
    completed: usize,
    hooks: Hooks<T, E>,
}

impl<T, E> Shared<T, E> {
    fn accepts(&self, epoch: u64) -> bool { self.state == SyncState::Running && self.epoch == epoch }

    fn abort_timers(&mut self) {
        for timer in self.timers.iter_mut().filter_map(Option::take) {
            timer.abort();
        }
    }

    fn clear_run(&mut self) {
        self.abort_timers();
        self.timers.clear();
        self.outcomes.clear();
        self.completed = 0;
    }

    /// Settle `index` if it is still pending. Returns the hooks to fire.
    fn settle(&mut self, index: usize, outcome: TaskOutcome<T, E>) -> Option<Settled<T, E>> {
        let slot = self.outcomes.get_mut(index)?;
        if slot.is_settled() {
            trace!(index, "task already settled");
            return None;
        }
        if let Some(timer) = self.timers.get_mut(index).and_then(Option::take) {
            timer.abort();
        }
        let failure = match &outcome {
            TaskOutcome::Failed(fault) => self
                .hooks
                .on_fail
                .clone()
                .map(|hook| (hook, fault.clone())),
            _ => None,
        };
        let timed_out = matches!(outcome, TaskOutcome::TimedOut);
        *slot = outcome;
        self.completed += 1;
        let timeout = if timed_out {
            self.hooks.on_timeout.clone()
        } else {
            None
        };
        Some(Settled {
            index,
            failure,
            timeout,
            completion: self.finish_if_complete(),
        })
    }

    fn finish_if_complete(&mut self) -> Option<(Option<CompleteHook<T, E>>, RunSummary<T, E>)> {
        if self.completed < self.outcomes.len() {
            return None;
        }
        let summary = RunSummary {
            outcomes: std::mem::take(&mut self.outcomes),
            completed: self.completed,
        };
        // `completed` stays readable until the next run or reset.
        self.abort_timers();
        self.timers.clear();
        self.state = SyncState::Idle;
        debug!(completed = summary.completed, "synchronizer run complete");
        Some((self.hooks.on_complete.clone(), summary))
    }
}

struct Settled<T, E> {
    index: usize,
    failure: Option<(FailHook<E>, Fault<E>)>,
    timeout: Option<TimeoutHook>,
    completion: Option<(Option<CompleteHook<T, E>>, RunSummary<T, E>)>,
}

impl<T, E> Settled<T, E> {
    fn fire(self) {
        if let Some((hook, fault)) = self.failure {
            hook(self.index, &fault);
        }
        if let Some(hook) = self.timeout {
            hook(self.index);
        }
        if let Some((Some(hook), summary)) = self.completion {
            hook(&summary);
        }
    }
}

fn lock<T, E>(shared: &Mutex<Shared<T, E>>) -> MutexGuard<'_, Shared<T, E>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn settle<T, E>(shared: &Mutex<Shared<T, E>>, index: usize, epoch: u64, outcome: TaskOutcome<T, E>) {
    let settled = {
        let mut guard = lock(shared);
        if !guard.accepts(epoch) {
            trace!(index, epoch, "ignoring report outside its run");
            return;
        }
        guard.settle(index, outcome)
    };
    if let Some(settled) = settled {
        settled.fire();
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Handle through which a task reports its result.
///
/// Only the first report for a task within a run counts. Reports arriving
/// after a timeout, a halt or the end of the run are ignored.
pub struct Reporter<T, E> {
    shared: Weak<Mutex<Shared<T, E>>>,
    index: usize,
    epoch: u64,
}

impl<T, E> Clone for Reporter<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
            index: self.index,
            epoch: self.epoch,
        }
    }
}

impl<T, E> fmt::Debug for Reporter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("index", &self.index)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl<T, E> Reporter<T, E> {
    /// Index of the task this reporter belongs to.
    #[must_use]
    pub fn index(&self) -> usize { self.index }

    /// Record the task's result.
    pub fn report(self, result: Result<T, E>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let outcome = match result {
            Ok(value) => TaskOutcome::Succeeded(value),
            Err(error) => TaskOutcome::Failed(Fault::Error(Arc::new(error))),
        };
        settle(&shared, self.index, self.epoch, outcome);
    }

    /// Whether the run this reporter belongs to can no longer accept reports
    /// because it was halted or has been superseded.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.upgrade().is_none_or(|shared| {
            let guard = lock(&shared);
            guard.epoch != self.epoch || guard.state == SyncState::Halted
        })
    }
}

/// Cloneable handle that can halt a running [`Synchronizer`].
pub struct HaltHandle<T, E> {
    shared: Weak<Mutex<Shared<T, E>>>,
}

impl<T, E> Clone for HaltHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for HaltHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("HaltHandle").finish_non_exhaustive() }
}

impl<T, E> HaltHandle<T, E> {
    /// Halt the run: abort every timer and ignore later reports.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if no run is in progress or the
    /// barrier has been dropped.
    pub fn halt(&self) -> Result<(), SyncError> {
        let shared = self.shared.upgrade().ok_or(SyncError::NotRunning)?;
        let hook = {
            let mut guard = lock(&shared);
            if guard.state != SyncState::Running {
                return Err(SyncError::NotRunning);
            }
            guard.state = SyncState::Halted;
            guard.abort_timers();
            debug!(completed = guard.completed, "synchronizer halted");
            guard.hooks.on_halt.clone()
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }
}

struct TaskSpec<A, T, E> {
    body: TaskFn<A, T, E>,
    timeout: Duration,
}

/// Barrier that fans a call out to several tasks and reports once all of
/// them have settled.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use mudbridge::synchronizer::Synchronizer;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut barrier: Synchronizer<u32, u32, String> = Synchronizer::new();
/// barrier.add_function(|n: &u32, reporter| {
///     reporter.report(Ok(n * 2));
///     Ok(())
/// }, None).expect("idle");
/// barrier.add_function(|n: &u32, reporter| {
///     reporter.report(Ok(n + 1));
///     Ok(())
/// }, None).expect("idle");
///
/// let totals = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&totals);
/// barrier.on_complete(move |summary| {
///     sink.lock().expect("lock").extend(summary.successes().copied());
/// });
///
/// barrier.run(&5).expect("run");
/// assert_eq!(*totals.lock().expect("lock"), vec![10, 6]);
/// # }
/// ```
pub struct Synchronizer<A, T, E> {
    tasks: Vec<TaskSpec<A, T, E>>,
    shared: Arc<Mutex<Shared<T, E>>>,
}

impl<A, T, E> Default for Synchronizer<A, T, E> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            shared: Arc::new(Mutex::new(Shared {
                state: SyncState::Idle,
                epoch: 0,
                outcomes: Vec::new(),
                timers: Vec::new(),
                completed: 0,
                hooks: Hooks::default(),
            })),
        }
    }
}

impl<A, T, E> fmt::Debug for Synchronizer<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = lock(&self.shared);
        f.debug_struct("Synchronizer")
            .field("tasks", &self.tasks.len())
            .field("state", &guard.state)
            .field("completed", &guard.completed)
            .finish_non_exhaustive()
    }
}

impl<A, T, E> Synchronizer<A, T, E>
where
    T: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Create an idle barrier with no tasks.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SyncState { lock(&self.shared).state }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize { self.tasks.len() }

    /// Whether no tasks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.tasks.is_empty() }

    /// Number of tasks that have settled in the current run, or in the last
    /// completed run until the next [`run`](Self::run) or
    /// [`reset`](Self::reset). The completion hook therefore sees the full
    /// count.
    #[must_use]
    pub fn count_completed(&self) -> usize { lock(&self.shared).completed }

    fn ensure_idle(&self) -> Result<(), SyncError> {
        match self.state() {
            SyncState::Idle => Ok(()),
            SyncState::Running | SyncState::Halted => Err(SyncError::Busy),
        }
    }

    /// Append a task. `timeout` defaults to [`DEFAULT_TASK_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] unless the barrier is idle.
    pub fn add_function<F>(&mut self, body: F, timeout: Option<Duration>) -> Result<usize, SyncError>
    where
        F: Fn(&A, Reporter<T, E>) -> Result<(), E> + Send + Sync + 'static,
    {
        self.ensure_idle()?;
        self.tasks.push(TaskSpec {
            body: Arc::new(body),
            timeout: timeout.unwrap_or(DEFAULT_TASK_TIMEOUT),
        });
        Ok(self.tasks.len() - 1)
    }

    /// Remove the task at `index`; later tasks shift down by one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] unless the barrier is idle, or
    /// [`SyncError::NoSuchTask`] for an out-of-range index.
    pub fn remove_function(&mut self, index: usize) -> Result<(), SyncError> {
        self.ensure_idle()?;
        if index >= self.tasks.len() {
            return Err(SyncError::NoSuchTask(index));
        }
        self.tasks.remove(index);
        Ok(())
    }

    /// Set the hook fired once every task has settled.
    pub fn on_complete<F>(&mut self, hook: F)
    where
        F: Fn(&RunSummary<T, E>) + Send + Sync + 'static,
    {
        lock(&self.shared).hooks.on_complete = Some(Arc::new(hook));
    }

    /// Set the hook fired for each failed task.
    pub fn on_fail<F>(&mut self, hook: F)
    where
        F: Fn(usize, &Fault<E>) + Send + Sync + 'static,
    {
        lock(&self.shared).hooks.on_fail = Some(Arc::new(hook));
    }

    /// Set the hook fired when the run is halted.
    pub fn on_halt<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.shared).hooks.on_halt = Some(Arc::new(hook));
    }

    /// Set the hook fired when a task's timer expires.
    pub fn on_timeout<F>(&mut self, hook: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        lock(&self.shared).hooks.on_timeout = Some(Arc::new(hook));
    }

    /// Handle that can halt this barrier from inside a task or hook.
    #[must_use]
    pub fn halt_handle(&self) -> HaltHandle<T, E> {
        HaltHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Halt the current run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if no run is in progress.
    pub fn halt(&self) -> Result<(), SyncError> { self.halt_handle().halt() }

    /// Return a halted barrier to [`SyncState::Idle`]. On an idle barrier it
    /// only clears the last run's completed count.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] while a run is in progress.
    pub fn reset(&self) -> Result<(), SyncError> {
        let mut guard = lock(&self.shared);
        match guard.state {
            SyncState::Idle => {
                guard.completed = 0;
                Ok(())
            }
            SyncState::Running => Err(SyncError::Busy),
            SyncState::Halted => {
                guard.clear_run();
                guard.state = SyncState::Idle;
                Ok(())
            }
        }
    }

    /// Start a run, invoking every task in order with `args`.
    ///
    /// Each task's timer is armed before the task is invoked. A task that
    /// returns an error or panics is recorded as failed; the remaining tasks
    /// still run. If a task halts the barrier, the tasks after it are not
    /// started.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRunning`] or [`SyncError::NotReset`] when
    /// the barrier is not idle, and [`SyncError::NoRuntime`] outside a Tokio
    /// runtime.
    pub fn run(&self, args: &A) -> Result<(), SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (epoch, completion) = {
            let mut guard = lock(&self.shared);
            match guard.state {
                SyncState::Running => return Err(SyncError::AlreadyRunning),
                SyncState::Halted => return Err(SyncError::NotReset),
                SyncState::Idle => {}
            }
            guard.clear_run();
            guard.epoch = guard.epoch.wrapping_add(1);
            guard.state = SyncState::Running;
            guard.outcomes = self.tasks.iter().map(|_| TaskOutcome::Pending).collect();
            guard.timers = self.tasks.iter().map(|_| None).collect();
            debug!(tasks = self.tasks.len(), epoch = guard.epoch, "synchronizer run started");
            (guard.epoch, guard.finish_if_complete())
        };
        if let Some((Some(hook), summary)) = completion {
            hook(&summary);
            return Ok(());
        }

        for (index, task) in self.tasks.iter().enumerate() {
            if !self.arm_timer(&runtime, index, epoch, task.timeout) {
                trace!(index, "run no longer active, not starting remaining tasks");
                break;
            }
            let reporter = Reporter {
                shared: Arc::downgrade(&self.shared),
                index,
                epoch,
            };
            let fault = match catch_unwind(AssertUnwindSafe(|| (task.body)(args, reporter))) {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => Fault::Error(Arc::new(error)),
                Err(payload) => {
                    let message = panic_text(payload.as_ref());
                    warn!(index, panic = %message, "synchronizer task panicked");
                    Fault::Panic(message)
                }
            };
            settle(&self.shared, index, epoch, TaskOutcome::Failed(fault));
        }
        Ok(())
    }

    /// Arm the timer for `index`. Returns `false` once the run has ended.
    fn arm_timer(&self, runtime: &Handle, index: usize, epoch: u64, timeout: Duration) -> bool {
        let mut guard = lock(&self.shared);
        if !guard.accepts(epoch) {
            return false;
        }
        let weak = Arc::downgrade(&self.shared);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                expire(&shared, index, epoch);
            }
        });
        if let Some(slot) = guard.timers.get_mut(index) {
            *slot = Some(timer.abort_handle());
        }
        true
    }
}

fn expire<T, E>(shared: &Mutex<Shared<T, E>>, index: usize, epoch: u64) {
    let settled = {
        let mut guard = lock(shared);
        if !guard.accepts(epoch) {
            return;
        }
        if let Some(slot) = guard.timers.get_mut(index) {
            *slot = None;
        }
        let settled = guard.settle(index, TaskOutcome::TimedOut);
        if settled.is_some() {
            warn!(index, "synchronizer task timed out");
            metrics::inc_task_timeouts();
        }
        settled
    };
    if let Some(settled) = settled {
        settled.fire();
    }
}

impl<A, T, E> Drop for Synchronizer<A, T, E> {
    fn drop(&mut self) { lock(&self.shared).abort_timers(); }
}
