/*!
 * Lock & RLock
 *
 * Mutual exclusion across logical tasks. The raw mutex is an async mutex
 * with FIFO-fair wakeups; the held guard is parked in the handle so a
 * synchronous `release()` can drop it from any call frame.
 *
 * `Lock` is owner-agnostic on release. `RLock` is reentrant and owner
 * checked: only the owning task may release, once per acquisition.
 */

use crate::core::{Error, Facility, Result, TaskId};
use crate::registry;
use crate::runtime::portal;
use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as RawMutex, OwnedMutexGuard};

struct Held {
    _guard: OwnedMutexGuard<()>,
    owner: TaskId,
}

/// Non-reentrant mutual exclusion, releasable from any task.
#[derive(Clone)]
pub struct Lock {
    raw: Arc<RawMutex<()>>,
    held: Arc<Mutex<Option<Held>>>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    pub fn new() -> Self {
        Self {
            raw: Arc::new(RawMutex::new(())),
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// Acquire the lock.
    ///
    /// Returns `Ok(true)` on acquisition, `Ok(false)` if a non-blocking
    /// attempt found the lock held or a timeout elapsed. A timeout on a
    /// non-blocking acquire is a state error.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> Result<bool> {
        if !blocking && timeout.is_some() {
            return Err(Error::state(
                "can't specify a timeout for a non-blocking acquire",
            ));
        }
        // Uncontended path needs no portal round-trip.
        if let Ok(guard) = self.raw.clone().try_lock_owned() {
            self.store(guard);
            return Ok(true);
        }
        if !blocking {
            return Ok(false);
        }
        let raw = self.raw.clone();
        match portal::submit(Facility::Sync, timeout, async move {
            Ok(raw.lock_owned().await)
        }) {
            Ok(guard) => {
                self.store(guard);
                Ok(true)
            }
            Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the lock. Releasing an unheld lock is a state error.
    pub fn release(&self) -> Result<()> {
        match self.held.lock().take() {
            Some(_held) => Ok(()),
            None => Err(Error::state("release of unheld lock")),
        }
    }

    pub fn locked(&self) -> bool {
        self.held.lock().is_some()
    }

    /// Whether the calling task performed the live acquisition.
    pub(crate) fn held_by_current(&self) -> bool {
        let me = registry::current_identity();
        self.held.lock().as_ref().is_some_and(|h| h.owner == me)
    }

    /// Run `f` with the lock held, releasing on every exit path.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.acquire(true, None)?;
        let result = catch_unwind(AssertUnwindSafe(f));
        let released = self.release();
        match result {
            Ok(value) => released.map(|()| value),
            Err(payload) => resume_unwind(payload),
        }
    }

    fn store(&self, guard: OwnedMutexGuard<()>) {
        *self.held.lock() = Some(Held {
            _guard: guard,
            owner: registry::current_identity(),
        });
    }
}

struct ReentrantHeld {
    _guard: OwnedMutexGuard<()>,
    owner: TaskId,
    depth: usize,
}

/// Reentrant lock owned by the acquiring task.
#[derive(Clone)]
pub struct RLock {
    raw: Arc<RawMutex<()>>,
    held: Arc<Mutex<Option<ReentrantHeld>>>,
}

impl Default for RLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RLock {
    pub fn new() -> Self {
        Self {
            raw: Arc::new(RawMutex::new(())),
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// Acquire, recursively if the calling task already owns the lock.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> Result<bool> {
        if !blocking && timeout.is_some() {
            return Err(Error::state(
                "can't specify a timeout for a non-blocking acquire",
            ));
        }
        let me = registry::current_identity();
        {
            let mut held = self.held.lock();
            if let Some(h) = held.as_mut() {
                if h.owner == me {
                    h.depth += 1;
                    return Ok(true);
                }
            }
        }
        if let Ok(guard) = self.raw.clone().try_lock_owned() {
            self.store(guard, me);
            return Ok(true);
        }
        if !blocking {
            return Ok(false);
        }
        let raw = self.raw.clone();
        match portal::submit(Facility::Sync, timeout, async move {
            Ok(raw.lock_owned().await)
        }) {
            Ok(guard) => {
                self.store(guard, me);
                Ok(true)
            }
            Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release one level of the calling task's ownership.
    pub fn release(&self) -> Result<()> {
        let me = registry::current_identity();
        let mut held = self.held.lock();
        match held.as_mut() {
            Some(h) if h.owner == me => {
                h.depth -= 1;
                if h.depth == 0 {
                    *held = None;
                }
                Ok(())
            }
            Some(_) => Err(Error::state("cannot release a lock owned by another task")),
            None => Err(Error::state("release of unheld lock")),
        }
    }

    pub fn locked(&self) -> bool {
        self.held.lock().is_some()
    }

    pub(crate) fn held_by_current(&self) -> bool {
        let me = registry::current_identity();
        self.held.lock().as_ref().is_some_and(|h| h.owner == me)
    }

    /// Run `f` with the lock held, releasing on every exit path.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.acquire(true, None)?;
        let result = catch_unwind(AssertUnwindSafe(f));
        let released = self.release();
        match result {
            Ok(value) => released.map(|()| value),
            Err(payload) => resume_unwind(payload),
        }
    }

    fn store(&self, guard: OwnedMutexGuard<()>, owner: TaskId) {
        *self.held.lock() = Some(ReentrantHeld {
            _guard: guard,
            owner,
            depth: 1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncontended_acquire_release() {
        let lock = Lock::new();
        assert!(lock.acquire(true, None).unwrap());
        assert!(lock.locked());
        lock.release().unwrap();
        assert!(!lock.locked());
    }

    #[test]
    fn test_nonblocking_acquire_fails_when_held() {
        let lock = Lock::new();
        assert!(lock.acquire(false, None).unwrap());
        assert!(!lock.acquire(false, None).unwrap());
        lock.release().unwrap();
    }

    #[test]
    fn test_release_unheld_is_error() {
        let lock = Lock::new();
        assert!(matches!(lock.release(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_nonblocking_with_timeout_is_error() {
        let lock = Lock::new();
        let result = lock.acquire(false, Some(Duration::from_millis(1)));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_rlock_reentrancy() {
        let lock = RLock::new();
        assert!(lock.acquire(true, None).unwrap());
        assert!(lock.acquire(true, None).unwrap());
        lock.release().unwrap();
        assert!(lock.locked());
        lock.release().unwrap();
        assert!(!lock.locked());
    }

    #[test]
    fn test_rlock_overrelease_is_error() {
        let lock = RLock::new();
        lock.acquire(true, None).unwrap();
        lock.release().unwrap();
        assert!(matches!(lock.release(), Err(Error::InvalidState(_))));
    }
}
