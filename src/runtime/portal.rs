/*!
 * Bridge Portal
 *
 * Lets one synchronous call frame drive an asynchronous operation to
 * completion, suspending only its owning logical task. The operation future
 * is shipped to the driver thread; the calling OS thread releases the
 * carrier baton and parks on the reply channel, then re-acquires the baton
 * before control returns to user code.
 *
 * Cancellation delivered while a call is in flight is raced against the
 * operation inside the driver and surfaces as [`Error::Cancelled`] to the
 * synchronous caller; it is never absorbed and the caller never hangs.
 *
 * In native mode the baton stays held for the duration of the call and
 * cancellation is not raced: the caller behaves like a true blocking
 * primitive on the carrier.
 */

use crate::core::{Error, Facility, Result};
use crate::registry::task::{self, TaskState};
use crate::runtime::{self, native, Context};
use log::trace;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;

/// Drive `op` to completion on the driver, suspending the current logical
/// task. The entry point used by every emulated facility.
///
/// `timeout` is raced with the backend timer and surfaces as
/// [`Error::Timeout`]. Calling from a thread without an installed portal is
/// [`Error::PortalMissing`].
pub(crate) fn submit<T, F>(facility: Facility, timeout: Option<Duration>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let ctx = runtime::context()?;
    let native = native::active() || ctx.is_excluded(facility);
    let task = task::current_task().ok_or(Error::PortalMissing)?;
    call(ctx, &task, timeout, native, op)
}

/// Portal call against an explicit task. `native` keeps the baton held and
/// skips the cancellation race.
pub(crate) fn call<T, F>(
    ctx: &Context,
    task: &TaskState,
    timeout: Option<Duration>,
    native: bool,
    op: F,
) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    // Calls through a shared handle of the same task are serialized, never
    // interleaved.
    let _gate = task.portal_gate.lock();

    let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
    let timer = timeout.map(|d| ctx.scheduler.sleep(d));
    let cancel = (!native).then(|| task.token.clone());

    trace!(
        "Portal call from task {} (timeout: {:?}, native: {})",
        task.id,
        timeout,
        native
    );

    ctx.driver.submit(Box::pin(async move {
        let guarded = async move {
            match timer {
                Some(timer) => tokio::select! {
                    result = op => result,
                    _ = timer => Err(Error::Timeout),
                },
                None => op.await,
            }
        };
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = guarded => result,
            },
            None => guarded.await,
        };
        let _ = reply_tx.send(result);
    }))?;

    let _pause = (!native).then(|| ctx.baton.pause());
    match reply_rx.blocking_recv() {
        Ok(result) => result,
        // Driver torn down with the op in flight.
        Err(_) => Err(Error::Cancelled),
    }
}
