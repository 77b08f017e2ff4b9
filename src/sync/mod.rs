/*!
 * Synchronization Primitives
 *
 * Blocking-style primitives with conventional threading semantics, backed
 * by executor-agnostic async machinery driven through the portal. Waiting
 * suspends only the calling logical task; timeouts and cancellation flow
 * through every wait.
 */

mod barrier;
mod condition;
mod event;
mod lock;
mod queue;

pub use barrier::Barrier;
pub use condition::Condition;
pub use event::Event;
pub use lock::{Lock, RLock};
pub use queue::Queue;

use crate::core::Result;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

/// Run `f` with `lock` held, releasing on every exit path including panic.
pub(crate) fn with_lock<R>(lock: &Lock, f: impl FnOnce() -> Result<R>) -> Result<R> {
    lock.acquire(true, None)?;
    let result = catch_unwind(AssertUnwindSafe(f));
    // A cancelled condition wait inside `f` propagates without the lock
    // held, and another task may have taken it since; release only our
    // own hold so the cancellation outcome survives intact.
    let released = if lock.held_by_current() {
        lock.release()
    } else {
        Ok(())
    };
    match result {
        Ok(value) => released.and(value),
        Err(payload) => resume_unwind(payload),
    }
}
