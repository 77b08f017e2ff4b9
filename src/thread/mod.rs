/*!
 * Thread Emulation Layer
 *
 * Logical threads with conventional create/start/join/identity/daemon
 * semantics, multiplexed onto the cooperative scheduler. A handle is a
 * value object until `start()`; afterwards it points at the registry's
 * task record.
 *
 * An uncaught body failure is never delivered to a joiner: `join()` only
 * reports completion or timeout, and failures go to the process-wide
 * uncaught-failure hook.
 */

use crate::core::{Error, Facility, Result, TaskId};
use crate::registry::{self, task::TaskState};
use crate::runtime::{self, portal};
use log::error;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What reached the uncaught-failure hook: a propagated error or a panic
/// message from the thread body.
#[derive(Debug)]
pub enum Failure {
    Error(Error),
    Panic(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(e) => write!(f, "{e}"),
            Failure::Panic(msg) => write!(f, "panic: {msg}"),
        }
    }
}

enum ThreadState {
    New {
        body: Option<registry::TaskBody>,
        name: Option<String>,
        daemon: bool,
    },
    Live(Arc<TaskState>),
}

/// Handle to a logical thread.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<Mutex<ThreadState>>,
}

impl Thread {
    /// Create a not-yet-running thread. The daemon flag is inherited from
    /// the creating task.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Builder::new().build(body)
    }

    /// Create and immediately start a thread.
    pub fn spawn<F>(body: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Builder::new().spawn(body)
    }

    pub(crate) fn from_task(task: Arc<TaskState>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ThreadState::Live(task))),
        }
    }

    fn from_parts(body: registry::TaskBody, name: Option<String>, daemon: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ThreadState::New {
                body: Some(body),
                name,
                daemon,
            })),
        }
    }

    /// Transition Created -> Running. A second call is an error.
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.lock();
        match &mut *state {
            ThreadState::Live(_) => Err(Error::state("thread already started")),
            ThreadState::New { body, name, daemon } => {
                let body = body
                    .take()
                    .ok_or_else(|| Error::state("thread already started"))?;
                let task = registry::spawn_task(name.take(), Some(*daemon), body)?;
                *state = ThreadState::Live(task);
                Ok(())
            }
        }
    }

    /// Suspend until the thread completes (`Ok(true)`) or the timeout
    /// elapses (`Ok(false)`). Self-join and join-before-start are state
    /// errors.
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        let target = match &*self.inner.lock() {
            ThreadState::New { .. } => {
                return Err(Error::state("cannot join thread before it is started"))
            }
            ThreadState::Live(task) => task.clone(),
        };
        if target.id == registry::current_identity() {
            return Err(Error::state("cannot join current thread"));
        }
        if target.is_done() {
            return Ok(true);
        }
        let mut done = target.done_signal();
        let waited = portal::submit(Facility::Thread, timeout, async move {
            // The sender lives in the task record kept alive by `done`.
            let _ = done.wait_for(|finished| *finished).await;
            Ok(())
        });
        match waited {
            Ok(()) => Ok(true),
            Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deliver cooperative cancellation, observed at the thread's next (or
    /// current) suspension point.
    pub fn cancel(&self) -> Result<()> {
        match &*self.inner.lock() {
            ThreadState::New { .. } => {
                Err(Error::state("cannot cancel thread before it is started"))
            }
            ThreadState::Live(task) => {
                task.cancel();
                Ok(())
            }
        }
    }

    /// Identity, assigned at start. Monotonic and never reused.
    pub fn ident(&self) -> Option<TaskId> {
        match &*self.inner.lock() {
            ThreadState::New { .. } => None,
            ThreadState::Live(task) => Some(task.id),
        }
    }

    pub fn name(&self) -> String {
        match &*self.inner.lock() {
            ThreadState::New { name, .. } => {
                name.clone().unwrap_or_else(|| "<unstarted>".to_string())
            }
            ThreadState::Live(task) => task.name(),
        }
    }

    pub fn set_name(&self, name: impl Into<String>) {
        match &mut *self.inner.lock() {
            ThreadState::New { name: slot, .. } => *slot = Some(name.into()),
            ThreadState::Live(task) => task.set_name(name.into()),
        }
    }

    pub fn is_alive(&self) -> bool {
        match &*self.inner.lock() {
            ThreadState::New { .. } => false,
            ThreadState::Live(task) => !task.is_done(),
        }
    }

    pub fn is_daemon(&self) -> bool {
        match &*self.inner.lock() {
            ThreadState::New { daemon, .. } => *daemon,
            ThreadState::Live(task) => task.is_daemon(),
        }
    }

    /// Toggle the daemon flag. Valid before and after start; the group's
    /// daemon set is updated idempotently.
    pub fn set_daemon(&self, daemon: bool) {
        match &mut *self.inner.lock() {
            ThreadState::New { daemon: flag, .. } => *flag = daemon,
            ThreadState::Live(task) => task.set_daemon(daemon),
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("ident", &self.ident())
            .field("name", &self.name())
            .field("daemon", &self.is_daemon())
            .finish()
    }
}

/// Builder for a logical thread, mirroring the conventional surface.
#[derive(Default)]
pub struct Builder {
    name: Option<String>,
    daemon: Option<bool>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Create a not-yet-running thread.
    pub fn build<F>(self, body: F) -> Thread
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let daemon = self
            .daemon
            .unwrap_or_else(|| current().is_daemon());
        Thread::from_parts(Box::new(body), self.name, daemon)
    }

    /// Create and start a thread.
    pub fn spawn<F>(self, body: F) -> Result<Thread>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let thread = self.build(body);
        thread.start()?;
        Ok(thread)
    }
}

/// Handle of the calling task. Unattached threads observe the synthetic
/// root-thread value (daemon = false).
pub fn current() -> Thread {
    if let Some(task) = registry::task::current_task() {
        return Thread::from_task(task);
    }
    match runtime::context() {
        Ok(ctx) => Thread::from_task(ctx.root.clone()),
        // Identity queries never fail: synthesize a root value.
        Err(_) => Thread::from_task(TaskState::new(
            crate::core::ROOT_TASK_ID,
            "main".to_string(),
            false,
        )),
    }
}

/// Install the process-wide uncaught-failure hook.
///
/// The default behavior (no hook installed) logs the failure and aborts
/// the process, matching the convention that an uncaught thread failure is
/// re-raised into the carrier.
pub fn set_uncaught_hook<F>(hook: F) -> Result<()>
where
    F: Fn(&Thread, &Failure) + Send + Sync + 'static,
{
    let ctx = runtime::context()?;
    *ctx.uncaught_hook.write() = Some(Box::new(hook));
    Ok(())
}

pub(crate) fn deliver_uncaught(task: &Arc<TaskState>, failure: Failure) {
    if let Ok(ctx) = runtime::context() {
        let hook = ctx.uncaught_hook.read();
        if let Some(installed) = hook.as_ref() {
            installed(&Thread::from_task(task.clone()), &failure);
            return;
        }
    }
    error!("Uncaught failure in thread '{}': {}", task.name(), failure);
    std::process::abort();
}
