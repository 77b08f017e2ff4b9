/*!
 * Task Registry & Group Supervisor
 *
 * Wraps the spawn primitive: every logical task gets a carrier OS thread,
 * an installed portal, a directory entry, and a group membership before the
 * spawn call returns. The readiness handshake eliminates the race between
 * returning a handle and the task's portal being usable.
 */

pub(crate) mod group;
pub(crate) mod task;

use crate::core::{Error, Result, TaskId, ROOT_TASK_ID};
use crate::runtime;
use group::Group;
use log::{debug, trace};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use task::TaskState;

pub(crate) type TaskBody = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Identity of the calling logical task; the synthetic root identity for
/// unattached threads.
pub(crate) fn current_identity() -> TaskId {
    task::current_task().map(|t| t.id).unwrap_or(ROOT_TASK_ID)
}

/// Spawn a logical task in the current group.
///
/// Does not return until the new task has begun executing and signaled
/// readiness. The daemon flag defaults to the spawning task's.
pub(crate) fn spawn_task(
    name: Option<String>,
    daemon: Option<bool>,
    body: TaskBody,
) -> Result<Arc<TaskState>> {
    let ctx = runtime::context()?;
    let id = ctx.allocate_id();
    let name = name.unwrap_or_else(|| format!("thread-{id}"));
    let daemon = daemon.unwrap_or_else(|| {
        task::current_task()
            .map(|t| t.is_daemon())
            .unwrap_or(false)
    });

    let spawned = TaskState::new(id, name.clone(), daemon);
    let owning_group = group::current_group().unwrap_or_else(|| ctx.root_group.clone());
    spawned.join_group(owning_group.clone());
    ctx.directory.insert(id, spawned.clone());

    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    let carried = spawned.clone();
    let spawn_result = std::thread::Builder::new().name(name).spawn(move || {
        // Portal installation: current-task identity is what routes this
        // thread's blocking calls through the driver.
        task::set_current(Some(carried.clone()));
        group::set_current_group(Some(owning_group));
        // Readiness is signaled before taking the baton: the spawner may
        // still hold it.
        let _ = ready_tx.send(());
        run_task(carried, body);
    });

    if let Err(spawn_err) = spawn_result {
        ctx.directory.remove(&id);
        spawned.leave_group();
        spawned.mark_done();
        return Err(Error::Io(spawn_err));
    }
    if ready_rx.recv().is_err() {
        // The carrier thread died before installing its portal.
        ctx.directory.remove(&id);
        spawned.leave_group();
        spawned.mark_done();
        return Err(Error::state("spawned task failed to signal readiness"));
    }

    debug!("Spawned task {} (daemon: {})", id, daemon);
    Ok(spawned)
}

fn run_task(current: Arc<TaskState>, body: TaskBody) {
    let ctx = match runtime::context() {
        Ok(ctx) => ctx,
        // Unreachable: spawn_task required an initialized runtime.
        Err(_) => return,
    };

    ctx.baton.acquire();
    trace!("Task {} running", current.id);
    let outcome = catch_unwind(AssertUnwindSafe(body));

    // Completion bookkeeping happens before failure delivery so the
    // completion signal fires in all cases.
    ctx.directory.remove(&current.id);
    current.leave_group();
    current.mark_done();

    match outcome {
        Ok(Ok(())) => trace!("Task {} completed", current.id),
        Ok(Err(failure)) if failure.is_cancelled() => {
            debug!("Task {} cancelled", current.id);
        }
        Ok(Err(failure)) => {
            crate::thread::deliver_uncaught(&current, crate::thread::Failure::Error(failure));
        }
        Err(payload) => {
            let message = panic_message(payload);
            crate::thread::deliver_uncaught(&current, crate::thread::Failure::Panic(message));
        }
    }
    ctx.baton.release();
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run `f` inside a fresh group.
///
/// On exit every still-registered daemon task is cancelled, then completion
/// of every member task is awaited, then the group is released. Requires an
/// installed portal (the teardown suspends).
pub fn runner_scope<R>(f: impl FnOnce() -> R) -> Result<R> {
    runtime::context()?;
    if task::current_task().is_none() {
        return Err(Error::PortalMissing);
    }

    let scope_group = Group::new();
    let previous = group::set_current_group(Some(scope_group.clone()));
    let result = catch_unwind(AssertUnwindSafe(f));
    group::set_current_group(previous);

    let teardown = scope_group.teardown();
    match result {
        Ok(value) => {
            teardown?;
            Ok(value)
        }
        // Teardown ran; the caller's panic wins.
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
