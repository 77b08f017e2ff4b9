/*!
 * Emulated Sleep
 *
 * Cooperative sleep that suspends only the calling logical task. Inside a
 * native scope (or with the Time facility excluded) it degrades to a true
 * blocking sleep on the carrier.
 */

use crate::core::{Facility, Result};
use crate::runtime::{self, native, portal};
use std::time::Duration;

/// Suspend the calling logical task for `duration`.
pub fn sleep(duration: Duration) -> Result<()> {
    let ctx = runtime::context()?;
    if native::active() || ctx.is_excluded(Facility::Time) {
        // The baton stays held: concurrent native sleepers serialize.
        std::thread::sleep(duration);
        return Ok(());
    }
    let timer = ctx.scheduler.sleep(duration);
    portal::submit(Facility::Time, None, async move {
        timer.await;
        Ok(())
    })
}
