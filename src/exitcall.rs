/*!
 * Exit Callbacks
 *
 * Process-teardown callback registration. Callbacks run LIFO when the
 * runner scope exits or at explicit `shutdown()`, each at most once. A
 * panicking callback is contained and the rest still run.
 */

use crate::core::Result;
use crate::runtime::{self, ExitCallback};
use log::{trace, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Token for a registered callback, usable with [`unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

/// Register a callback to run at runtime teardown. Later registrations run
/// first.
pub fn register<F>(call: F) -> Result<CallbackId>
where
    F: FnOnce() + Send + 'static,
{
    let ctx = runtime::context()?;
    let id = ctx.allocate_exit_id();
    ctx.exit_calls.lock().push(ExitCallback {
        id,
        call: Box::new(call),
    });
    trace!("Registered exit callback {}", id);
    Ok(CallbackId(id))
}

/// Remove a registered callback. Returns whether it was still pending.
pub fn unregister(id: CallbackId) -> Result<bool> {
    let ctx = runtime::context()?;
    let mut calls = ctx.exit_calls.lock();
    let before = calls.len();
    calls.retain(|cb| cb.id != id.0);
    Ok(calls.len() != before)
}

/// Drain and run pending callbacks, newest first.
pub(crate) fn run_pending() {
    let Ok(ctx) = runtime::context() else {
        return;
    };
    loop {
        // Pop outside the callback: a callback may register more.
        let Some(cb) = ctx.exit_calls.lock().pop() else {
            break;
        };
        trace!("Running exit callback {}", cb.id);
        if catch_unwind(AssertUnwindSafe(cb.call)).is_err() {
            warn!("Exit callback {} panicked", cb.id);
        }
    }
}
