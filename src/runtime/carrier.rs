/*!
 * Carrier Baton
 *
 * The process-wide token modeling the single execution carrier. At most one
 * logical thread holds the baton at a time; user code only ever runs while
 * its thread holds it. Every portal suspension releases the baton and
 * re-acquires it before control returns, so code between suspension points
 * runs atomically with respect to every other logical thread.
 */

use parking_lot::{Condvar, Mutex};

pub(crate) struct Baton {
    held: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    pub(crate) fn new() -> Self {
        Self {
            held: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Block until the baton is free, then take it.
    pub(crate) fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.cv.wait(&mut held);
        }
        *held = true;
    }

    pub(crate) fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        // parking_lot wakes the longest-waiting thread, which is enough to
        // rule out permanent starvation under finite contention.
        self.cv.notify_one();
    }

    /// Release for the duration of a suspension; the guard re-acquires on
    /// drop, before control returns to user code.
    pub(crate) fn pause(&self) -> BatonPause<'_> {
        self.release();
        BatonPause { baton: self }
    }
}

pub(crate) struct BatonPause<'a> {
    baton: &'a Baton,
}

impl Drop for BatonPause<'_> {
    fn drop(&mut self) {
        self.baton.acquire();
    }
}
