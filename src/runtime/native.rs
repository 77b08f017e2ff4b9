/*!
 * Native-Mode Escape
 *
 * A scoped, task-local flag routing emulated operations straight to the
 * true blocking primitive. While active, a blocking call holds the carrier
 * baton for its full duration, so other logical threads do not interleave —
 * exactly the behavior of a real blocking call on the carrier.
 *
 * Scopes nest and restore the prior value on drop. Tasks spawned while a
 * scope is active start in emulated mode: the flag lives in thread-local
 * storage of the carrier OS thread and is never inherited.
 */

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static NO_PATCH: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current logical task is in native mode.
pub fn active() -> bool {
    NO_PATCH.with(|f| f.get())
}

/// Guard restoring the previous mode on drop.
#[must_use = "the native scope ends when the guard is dropped"]
pub struct NativeGuard {
    prev: bool,
    // Not Send: the flag is task-local.
    _marker: PhantomData<*const ()>,
}

impl Drop for NativeGuard {
    fn drop(&mut self) {
        NO_PATCH.with(|f| f.set(self.prev));
    }
}

fn enter(value: bool) -> NativeGuard {
    let prev = NO_PATCH.with(|f| f.replace(value));
    NativeGuard {
        prev,
        _marker: PhantomData,
    }
}

/// Switch the current task to native mode until the guard drops.
pub fn scope() -> NativeGuard {
    enter(true)
}

/// Undo the effect of an enclosing [`scope`] until the guard drops.
pub fn patched() -> NativeGuard {
    enter(false)
}
