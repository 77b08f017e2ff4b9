/*!
 * Barrier
 *
 * Cyclic rendezvous for a fixed number of parties. The barrier moves
 * through filling and draining phases; a timeout, a panicking barrier
 * action, or `abort()` breaks it, failing every current and future waiter
 * with [`Error::BrokenBarrier`] until `reset()`.
 */

use crate::core::{Error, Result};
use crate::sync::Condition;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    /// Accepting waiters for the current generation.
    Filling,
    /// A full generation is being released.
    Draining,
    /// `reset()` ran while waiters were present; clears when they exit.
    Resetting,
    Broken,
}

struct BarrierState {
    phase: Phase,
    count: usize,
}

struct BarrierInner {
    cond: Condition,
    parties: usize,
    action: Option<Box<dyn Fn() + Send + Sync>>,
    timeout: Option<Duration>,
    state: Mutex<BarrierState>,
}

#[derive(Clone)]
pub struct Barrier {
    inner: Arc<BarrierInner>,
}

impl Barrier {
    pub fn new(parties: usize) -> Self {
        Self::with_action_and_timeout(parties, None, None)
    }

    /// `action`, if given, runs once per generation in the last arriving
    /// task, before any waiter is released. A panicking action breaks the
    /// barrier. `timeout` is the default for `wait(None)`.
    pub fn with_action_and_timeout(
        parties: usize,
        action: Option<Box<dyn Fn() + Send + Sync>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                cond: Condition::new(),
                parties,
                action,
                timeout,
                state: Mutex::new(BarrierState {
                    phase: Phase::Filling,
                    count: 0,
                }),
            }),
        }
    }

    /// Rendezvous with the other parties.
    ///
    /// Returns this task's arrival index, `0..parties`, unique within the
    /// generation. Index `parties - 1` belongs to the last arrival, which
    /// runs the action and releases the generation.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<usize> {
        let timeout = timeout.or(self.inner.timeout);
        let lock = self.inner.cond.lock().clone();
        lock.acquire(true, None)?;
        let result = self.exchange(timeout);
        // A cancelled wait propagates without the lock held.
        if lock.held_by_current() {
            lock.release()?;
        }
        result
    }

    fn exchange(&self, timeout: Option<Duration>) -> Result<usize> {
        self.enter()?;
        let index = {
            let mut st = self.inner.state.lock();
            let index = st.count;
            st.count += 1;
            index
        };
        let outcome = if index + 1 == self.inner.parties {
            self.release_generation()
        } else {
            self.wait_release(timeout)
        };
        self.inner.state.lock().count -= 1;
        self.exit()?;
        outcome.map(|()| index)
    }

    /// Block while a previous generation drains or resets.
    fn enter(&self) -> Result<()> {
        loop {
            match self.inner.state.lock().phase {
                Phase::Draining | Phase::Resetting => {
                    self.inner.cond.wait(None)?;
                }
                Phase::Broken => return Err(Error::BrokenBarrier),
                Phase::Filling => return Ok(()),
            }
        }
    }

    /// Last arrival: run the action and release the generation.
    fn release_generation(&self) -> Result<()> {
        if let Some(action) = &self.inner.action {
            if catch_unwind(AssertUnwindSafe(|| action())).is_err() {
                self.break_barrier()?;
                return Err(Error::BrokenBarrier);
            }
        }
        self.inner.state.lock().phase = Phase::Draining;
        self.inner.cond.notify_all()
    }

    /// Earlier arrival: wait until released, broken, or timed out.
    fn wait_release(&self, timeout: Option<Duration>) -> Result<()> {
        let released = self
            .inner
            .cond
            .wait_for(timeout, || self.inner.state.lock().phase != Phase::Filling)?;
        if !released {
            // Timing out strands the generation, so it breaks the barrier.
            self.break_barrier()?;
            return Err(Error::BrokenBarrier);
        }
        match self.inner.state.lock().phase {
            Phase::Broken | Phase::Resetting => Err(Error::BrokenBarrier),
            Phase::Draining | Phase::Filling => Ok(()),
        }
    }

    /// Last waiter out of a draining or resetting generation re-opens the
    /// barrier.
    fn exit(&self) -> Result<()> {
        let reopened = {
            let mut st = self.inner.state.lock();
            if st.count == 0 && matches!(st.phase, Phase::Draining | Phase::Resetting) {
                st.phase = Phase::Filling;
                true
            } else {
                false
            }
        };
        if reopened && self.inner.cond.lock().held_by_current() {
            self.inner.cond.notify_all()?;
        }
        Ok(())
    }

    fn break_barrier(&self) -> Result<()> {
        self.inner.state.lock().phase = Phase::Broken;
        self.inner.cond.notify_all()
    }

    /// Return the barrier to its initial state. Current waiters observe
    /// [`Error::BrokenBarrier`].
    pub fn reset(&self) -> Result<()> {
        self.inner.cond.lock().with(|| {
            {
                let mut st = self.inner.state.lock();
                if st.count > 0 {
                    // A draining generation finishes normally; only filling
                    // or broken states move to resetting.
                    if matches!(st.phase, Phase::Filling | Phase::Broken) {
                        st.phase = Phase::Resetting;
                    }
                } else {
                    st.phase = Phase::Filling;
                }
            }
            self.inner.cond.notify_all()
        })?
    }

    /// Break the barrier: every current and future waiter fails until
    /// `reset()`.
    pub fn abort(&self) -> Result<()> {
        self.inner.cond.lock().with(|| self.break_barrier())?
    }

    pub fn parties(&self) -> usize {
        self.inner.parties
    }

    /// Tasks currently waiting in the filling phase.
    pub fn n_waiting(&self) -> usize {
        let st = self.inner.state.lock();
        if st.phase == Phase::Filling {
            st.count
        } else {
            0
        }
    }

    pub fn is_broken(&self) -> bool {
        self.inner.state.lock().phase == Phase::Broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_barrier_is_open() {
        let barrier = Barrier::new(3);
        assert_eq!(barrier.parties(), 3);
        assert_eq!(barrier.n_waiting(), 0);
        assert!(!barrier.is_broken());
    }

    #[test]
    fn test_abort_breaks() {
        let barrier = Barrier::new(2);
        barrier.abort().unwrap();
        assert!(barrier.is_broken());
        barrier.reset().unwrap();
        assert!(!barrier.is_broken());
    }
}
