/*!
 * Group Supervisor
 *
 * Every started task belongs to exactly one live group. On scope exit the
 * group cancels its still-registered daemon tasks, then awaits completion
 * of every member before releasing the group. Non-daemon members are never
 * force-cancelled.
 */

use crate::core::{Facility, Result, TaskId};
use crate::registry::task::TaskState;
use crate::runtime::portal;
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, trace};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct Group {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    members: DashMap<TaskId, Arc<TaskState>, RandomState>,
    daemons: DashMap<TaskId, Arc<TaskState>, RandomState>,
}

impl Group {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                members: DashMap::with_hasher(RandomState::new()),
                daemons: DashMap::with_hasher(RandomState::new()),
            }),
        }
    }

    pub(crate) fn add_member(&self, task: Arc<TaskState>) {
        self.inner.members.insert(task.id, task);
    }

    pub(crate) fn remove_member(&self, id: TaskId) {
        self.inner.members.remove(&id);
        self.inner.daemons.remove(&id);
    }

    pub(crate) fn add_daemon(&self, task: Arc<TaskState>) {
        self.inner.daemons.insert(task.id, task);
    }

    pub(crate) fn remove_daemon(&self, id: TaskId) {
        self.inner.daemons.remove(&id);
    }

    pub(crate) fn member_count(&self) -> usize {
        self.inner.members.len()
    }

    /// Cancel every still-registered daemon, then await completion of every
    /// member. Must run on a thread with an installed portal.
    pub(crate) fn teardown(&self) -> Result<()> {
        debug!("Group teardown ({} member(s))", self.member_count());
        let daemons: Vec<Arc<TaskState>> = self
            .inner
            .daemons
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for task in &daemons {
            debug!("Cancelling daemon task {} ('{}')", task.id, task.name());
            task.cancel();
        }

        loop {
            // Members unregister themselves at completion; snapshot and
            // wait for whoever is still live.
            let remaining: Vec<Arc<TaskState>> = self
                .inner
                .members
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            if remaining.is_empty() {
                break;
            }
            for task in remaining {
                if task.is_done() {
                    continue;
                }
                trace!("Group teardown waiting on task {}", task.id);
                let mut rx = task.done_signal();
                portal::submit(Facility::Thread, None, async move {
                    // The sender lives in TaskState which `rx` keeps alive,
                    // so this only fails if the watch is poisoned mid-drop.
                    let _ = rx.wait_for(|done| *done).await;
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

thread_local! {
    static CURRENT_GROUP: std::cell::RefCell<Option<Group>> =
        const { std::cell::RefCell::new(None) };
}

pub(crate) fn current_group() -> Option<Group> {
    CURRENT_GROUP.with(|g| g.borrow().clone())
}

pub(crate) fn set_current_group(group: Option<Group>) -> Option<Group> {
    CURRENT_GROUP.with(|g| g.replace(group))
}
