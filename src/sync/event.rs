/*!
 * Event
 *
 * One-way flag with level semantics: `wait()` returns immediately while
 * set. `clear()` swaps in a fresh epoch so a waiter that began before the
 * clear still observes the set that woke it.
 */

use crate::core::{Error, Facility, Result};
use crate::runtime::portal;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Event {
    epoch: Arc<Mutex<Arc<watch::Sender<bool>>>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            epoch: Arc::new(Mutex::new(Arc::new(tx))),
        }
    }

    pub fn is_set(&self) -> bool {
        *self.epoch.lock().subscribe().borrow()
    }

    /// Set the flag, waking every waiter of the current epoch.
    pub fn set(&self) {
        self.epoch.lock().send_replace(true);
    }

    /// Reset the flag. Waiters already suspended stay attached to the old
    /// epoch and are still woken by the set that preceded or follows it.
    pub fn clear(&self) {
        let (tx, _) = watch::channel(false);
        *self.epoch.lock() = Arc::new(tx);
    }

    /// Suspend until the flag is set. Returns `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let tx = self.epoch.lock().clone();
        if *tx.subscribe().borrow() {
            return Ok(true);
        }
        let mut rx = tx.subscribe();
        let waited = portal::submit(Facility::Sync, timeout, async move {
            // `tx` is captured so the epoch sender outlives the wait.
            let _epoch = tx;
            let _ = rx.wait_for(|set| *set).await;
            Ok(())
        });
        match waited {
            Ok(()) => Ok(true),
            Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
