/*!
 * Runtime Context
 *
 * The single process-wide context with explicit init (`setup`) and teardown
 * (group-scope exit / `shutdown`) boundaries: selected backend, driver
 * handle, carrier baton, global task directory, identity counter, exclusion
 * set, uncaught-failure hook, and exit callbacks.
 */

mod backend;
pub(crate) mod carrier;
pub(crate) mod driver;
pub mod native;
pub(crate) mod portal;

pub use backend::{Backend, Config};

use crate::core::{Error, Facility, Result, TaskId, ROOT_TASK_ID};
use crate::registry::group::Group;
use crate::registry::task::{self, TaskState};
use ahash::RandomState;
use carrier::Baton;
use dashmap::DashMap;
use driver::{DriverHandle, Scheduler};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) type UncaughtHook =
    Box<dyn Fn(&crate::thread::Thread, &crate::thread::Failure) + Send + Sync>;

pub(crate) struct ExitCallback {
    pub(crate) id: u64,
    pub(crate) call: Box<dyn FnOnce() + Send>,
}

pub(crate) struct Context {
    backend: Backend,
    pub(crate) driver: DriverHandle,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) baton: Baton,
    /// Directory of running logical tasks.
    pub(crate) directory: DashMap<TaskId, Arc<TaskState>, RandomState>,
    next_id: AtomicU64,
    exclude: HashSet<Facility>,
    /// Synthetic root-thread value representing the carrier's original task.
    pub(crate) root: Arc<TaskState>,
    pub(crate) root_group: Group,
    pub(crate) uncaught_hook: RwLock<Option<UncaughtHook>>,
    pub(crate) exit_calls: Mutex<Vec<ExitCallback>>,
    next_exit_id: AtomicU64,
}

impl Context {
    /// Identities are monotonically increasing and never reused.
    pub(crate) fn allocate_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn allocate_exit_id(&self) -> u64 {
        self.next_exit_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_excluded(&self, facility: Facility) -> bool {
        self.exclude.contains(&facility)
    }
}

/// Handle to the initialized runtime.
pub struct Runtime {
    ctx: Context,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static SETUP_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the runtime with the selected backend.
///
/// The first call wins; a later call naming a different backend is rejected
/// with [`Error::BackendMismatch`], a call naming the same backend returns
/// the existing runtime.
pub fn setup(config: Config) -> Result<&'static Runtime> {
    let _guard = SETUP_LOCK.lock();
    if let Some(runtime) = RUNTIME.get() {
        return if runtime.backend() == config.backend {
            Ok(runtime)
        } else {
            Err(Error::BackendMismatch(runtime.backend()))
        };
    }

    let (driver, scheduler) = driver::start(config.backend)?;
    let root = TaskState::new(ROOT_TASK_ID, "main".to_string(), false);
    let runtime = Runtime {
        ctx: Context {
            backend: config.backend,
            driver,
            scheduler,
            baton: Baton::new(),
            directory: DashMap::with_hasher(RandomState::new()),
            next_id: AtomicU64::new(1),
            exclude: config.exclude,
            root,
            root_group: Group::new(),
            uncaught_hook: RwLock::new(None),
            exit_calls: Mutex::new(Vec::new()),
            next_exit_id: AtomicU64::new(1),
        },
    };
    info!("Runtime initialized (backend: {})", config.backend);
    Ok(RUNTIME.get_or_init(|| runtime))
}

/// The initialized runtime, or [`Error::NotInitialized`].
pub fn current() -> Result<&'static Runtime> {
    RUNTIME.get().ok_or(Error::NotInitialized)
}

pub(crate) fn context() -> Result<&'static Context> {
    RUNTIME
        .get()
        .map(|runtime| &runtime.ctx)
        .ok_or(Error::NotInitialized)
}

impl Runtime {
    pub fn backend(&self) -> Backend {
        self.ctx.backend
    }

    /// Install a portal for the calling OS thread, making it a logical task
    /// able to use every blocking facility. Idempotent: attaching an
    /// already-attached thread returns a no-op guard.
    ///
    /// The guard holds the carrier baton, so between suspension points this
    /// thread runs atomically with respect to every logical thread.
    pub fn attach(&self) -> Result<AttachGuard> {
        if task::current_task().is_some() {
            return Ok(AttachGuard {
                task: None,
                _marker: PhantomData,
            });
        }
        let id = self.ctx.allocate_id();
        let name = std::thread::current()
            .name()
            .unwrap_or("main")
            .to_string();
        let attached = TaskState::new(id, name, false);
        attached.join_group(self.ctx.root_group.clone());
        self.ctx.directory.insert(id, attached.clone());
        task::set_current(Some(attached.clone()));
        self.ctx.baton.acquire();
        debug!("Attached carrier thread as task {}", id);
        Ok(AttachGuard {
            task: Some(attached),
            _marker: PhantomData,
        })
    }

    /// Attach the calling thread, run `f` inside a fresh runner scope, then
    /// tear the scope down and fire registered exit callbacks.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let guard = self.attach()?;
        let result = crate::registry::runner_scope(f);
        drop(guard);
        // With ExitCall excluded, callbacks fire only at shutdown().
        if !self.ctx.is_excluded(Facility::ExitCall) {
            crate::exitcall::run_pending();
        }
        result
    }

    /// Fire exit callbacks and stop the driver. Pending portal calls
    /// observe cancellation; the runtime cannot be restarted afterwards.
    pub fn shutdown(&self) {
        crate::exitcall::run_pending();
        self.ctx.driver.shutdown();
        info!("Runtime shut down");
    }
}

/// Detaches the thread and releases the baton on drop.
#[must_use = "the thread detaches when the guard is dropped"]
pub struct AttachGuard {
    task: Option<Arc<TaskState>>,
    _marker: PhantomData<*const ()>,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if let Some(attached) = self.task.take() {
            if let Ok(ctx) = context() {
                ctx.directory.remove(&attached.id);
            }
            attached.leave_group();
            attached.mark_done();
            task::set_current(None);
            if let Ok(ctx) = context() {
                ctx.baton.release();
            }
            debug!("Detached carrier thread (task {})", attached.id);
        }
    }
}
