/*!
 * Logical Task State
 *
 * One record per logical thread: stable identity, display name, daemon
 * flag, completion signal, and cancellation handle. The record is created
 * at spawn, lives in the global directory while the task runs, and is
 * unregistered at completion.
 */

use crate::core::TaskId;
use crate::registry::group::Group;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) struct TaskState {
    pub(crate) id: TaskId,
    name: Mutex<String>,
    daemon: AtomicBool,
    /// Cancellation handle observed by every portal call of this task.
    pub(crate) token: CancellationToken,
    /// Completion signal; fires in all cases (success, failure, cancel).
    done: watch::Sender<bool>,
    group: Mutex<Option<Group>>,
    /// Serializes portal calls made through a shared handle of this task.
    pub(crate) portal_gate: Mutex<()>,
}

impl TaskState {
    pub(crate) fn new(id: TaskId, name: String, daemon: bool) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            id,
            name: Mutex::new(name),
            daemon: AtomicBool::new(daemon),
            token: CancellationToken::new(),
            done,
            group: Mutex::new(None),
            portal_gate: Mutex::new(()),
        })
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    pub(crate) fn is_daemon(&self) -> bool {
        self.daemon.load(Ordering::Acquire)
    }

    /// Toggle the daemon flag, idempotently updating the owning group's
    /// daemon set.
    pub(crate) fn set_daemon(self: &Arc<Self>, daemon: bool) {
        self.daemon.store(daemon, Ordering::Release);
        if let Some(group) = self.group.lock().clone() {
            if daemon {
                group.add_daemon(self.clone());
            } else {
                group.remove_daemon(self.id);
            }
        }
    }

    pub(crate) fn join_group(self: &Arc<Self>, group: Group) {
        group.add_member(self.clone());
        if self.is_daemon() {
            group.add_daemon(self.clone());
        }
        *self.group.lock() = Some(group);
    }

    pub(crate) fn leave_group(&self) {
        if let Some(group) = self.group.lock().take() {
            group.remove_member(self.id);
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.done.subscribe().borrow()
    }

    pub(crate) fn mark_done(&self) {
        self.done.send_replace(true);
    }

    pub(crate) fn done_signal(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Deliver cooperative cancellation. Observed at the task's next (or
    /// current) suspension point.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Arc<TaskState>>> =
        const { std::cell::RefCell::new(None) };
}

/// The task owning the current OS thread, if any.
pub(crate) fn current_task() -> Option<Arc<TaskState>> {
    CURRENT.with(|c| c.borrow().clone())
}

pub(crate) fn set_current(task: Option<Arc<TaskState>>) {
    CURRENT.with(|c| *c.borrow_mut() = task);
}
