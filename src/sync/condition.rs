/*!
 * Condition
 *
 * Condition variable over a [`Lock`]. Waiters queue FIFO as one-shot
 * wakeup slots; `notify` pops slots in order, and a popped slot spends
 * one wakeup whether or not the waiter is still listening.
 *
 * A timeout that loses the race against a notification counts as
 * notified: the waiter's slot is gone, so the wakeup was delivered.
 */

use crate::core::{Error, Facility, Result};
use crate::runtime::portal;
use crate::sync::Lock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Clone)]
pub struct Condition {
    lock: Lock,
    facility: Facility,
    waiters: Arc<Mutex<VecDeque<Waiter>>>,
    next_ticket: Arc<AtomicU64>,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    pub fn new() -> Self {
        Self::with_lock(Lock::new())
    }

    /// Build over an existing lock, letting several conditions share one
    /// mutex.
    pub fn with_lock(lock: Lock) -> Self {
        Self::with_lock_for(lock, Facility::Sync)
    }

    /// Waits report under `facility` for exclusion-set purposes.
    pub(crate) fn with_lock_for(lock: Lock, facility: Facility) -> Self {
        Self {
            lock,
            facility,
            waiters: Arc::new(Mutex::new(VecDeque::new())),
            next_ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Release the lock, suspend until notified, re-acquire, in that order.
    ///
    /// Returns whether the wait ended by notification (`false` means the
    /// timeout elapsed first). The lock is re-acquired on both outcomes;
    /// cancellation propagates without re-acquiring.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        if !self.lock.held_by_current() {
            return Err(Error::state("cannot wait on un-acquired lock"));
        }
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().push_back(Waiter { ticket, tx });
        self.lock.release()?;

        let signaled = portal::submit(self.facility, timeout, async move {
            let _ = rx.await;
            Ok(())
        });
        let notified = match signaled {
            Ok(()) => true,
            Err(Error::Timeout) => !self.withdraw(ticket),
            Err(e) => {
                self.withdraw(ticket);
                return Err(e);
            }
        };
        self.lock.acquire(true, None)?;
        Ok(notified)
    }

    /// Wait until `pred` holds or the timeout elapses; returns the final
    /// predicate value.
    pub fn wait_for(
        &self,
        timeout: Option<Duration>,
        mut pred: impl FnMut() -> bool,
    ) -> Result<bool> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut satisfied = pred();
        while !satisfied {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.wait(remaining)?;
            satisfied = pred();
        }
        Ok(satisfied)
    }

    /// Wake up to `n` waiters in FIFO order.
    pub fn notify(&self, n: usize) -> Result<()> {
        if !self.lock.held_by_current() {
            return Err(Error::state("cannot notify on un-acquired lock"));
        }
        let mut waiters = self.waiters.lock();
        let mut remaining = n;
        while remaining > 0 {
            let Some(waiter) = waiters.pop_front() else {
                break;
            };
            // A popped slot spends a wakeup even when its waiter stopped
            // listening mid-withdrawal; that waiter's missing ticket then
            // reports the notification, so it is delivered exactly once.
            let _ = waiter.tx.send(());
            remaining -= 1;
        }
        Ok(())
    }

    pub fn notify_all(&self) -> Result<()> {
        self.notify(usize::MAX)
    }

    /// Remove our slot; `false` means a notification consumed it first.
    fn withdraw(&self, ticket: u64) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|w| w.ticket == ticket) {
            Some(at) => {
                waiters.remove(at);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_without_lock_is_error() {
        let cond = Condition::new();
        assert!(matches!(cond.wait(None), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_notify_without_lock_is_error() {
        let cond = Condition::new();
        assert!(matches!(cond.notify(1), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_notify_with_no_waiters_is_ok() {
        let cond = Condition::new();
        cond.lock().acquire(true, None).unwrap();
        cond.notify(1).unwrap();
        cond.notify_all().unwrap();
        cond.lock().release().unwrap();
    }

    #[test]
    fn test_notify_spends_wakeup_on_withdrawing_waiter() {
        let cond = Condition::new();
        cond.lock().acquire(true, None).unwrap();

        // First slot's waiter timed out and dropped its receiver, but its
        // withdrawal has not removed the slot yet.
        let (dead_tx, dead_rx) = oneshot::channel();
        drop(dead_rx);
        let (live_tx, mut live_rx) = oneshot::channel();
        cond.waiters.lock().push_back(Waiter { ticket: 0, tx: dead_tx });
        cond.waiters.lock().push_back(Waiter { ticket: 1, tx: live_tx });

        cond.notify(1).unwrap();
        // The dead slot consumed the single wakeup; the second waiter
        // stays queued and undelivered.
        assert!(matches!(
            live_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert_eq!(cond.waiters.lock().len(), 1);
        // The raced-out waiter finds its ticket gone and reports notified.
        assert!(!cond.withdraw(0));
        cond.lock().release().unwrap();
    }
}
