/*!
 * Queue
 *
 * FIFO channel with optional capacity, blocking put/get, and work-tracking
 * via `task_done`/`join`. Three conditions share one mutex; items never
 * leave the calling thread, only the waits cross the portal.
 *
 * Capacity and timeout outcomes are distinct errors: a bounded `put` that
 * times out fails with [`Error::Full`], a `get` with [`Error::Empty`].
 */

use crate::core::{Error, Facility, Result};
use crate::sync::{self, Condition, Lock};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
}

struct QueueInner<T> {
    maxsize: usize,
    lock: Lock,
    not_empty: Condition,
    not_full: Condition,
    all_tasks_done: Condition,
    state: Mutex<QueueState<T>>,
}

pub struct Queue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T> {
    /// `maxsize == 0` means unbounded.
    pub fn new(maxsize: usize) -> Self {
        let lock = Lock::new();
        Self {
            inner: Arc::new(QueueInner {
                maxsize,
                not_empty: Condition::with_lock_for(lock.clone(), Facility::Queue),
                not_full: Condition::with_lock_for(lock.clone(), Facility::Queue),
                all_tasks_done: Condition::with_lock_for(lock.clone(), Facility::Queue),
                lock,
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    unfinished: 0,
                }),
            }),
        }
    }

    /// Append an item, suspending while the queue is full.
    pub fn put(&self, item: T, timeout: Option<Duration>) -> Result<()> {
        sync::with_lock(&self.inner.lock, || {
            if self.inner.maxsize > 0 {
                match timeout {
                    None => {
                        while self.len() >= self.inner.maxsize {
                            self.inner.not_full.wait(None)?;
                        }
                    }
                    Some(duration) => {
                        let deadline = Instant::now() + duration;
                        while self.len() >= self.inner.maxsize {
                            let now = Instant::now();
                            if now >= deadline {
                                return Err(Error::Full);
                            }
                            self.inner.not_full.wait(Some(deadline - now))?;
                        }
                    }
                }
            }
            self.push(item);
            self.inner.not_empty.notify(1)
        })
    }

    /// Append without suspending; a full queue is [`Error::Full`].
    pub fn put_nowait(&self, item: T) -> Result<()> {
        sync::with_lock(&self.inner.lock, || {
            if self.inner.maxsize > 0 && self.len() >= self.inner.maxsize {
                return Err(Error::Full);
            }
            self.push(item);
            self.inner.not_empty.notify(1)
        })
    }

    /// Remove and return the oldest item, suspending while empty.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T> {
        sync::with_lock(&self.inner.lock, || {
            match timeout {
                None => {
                    while self.len() == 0 {
                        self.inner.not_empty.wait(None)?;
                    }
                }
                Some(duration) => {
                    let deadline = Instant::now() + duration;
                    while self.len() == 0 {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(Error::Empty);
                        }
                        self.inner.not_empty.wait(Some(deadline - now))?;
                    }
                }
            }
            self.pop()
        })
    }

    /// Remove without suspending; an empty queue is [`Error::Empty`].
    pub fn get_nowait(&self) -> Result<T> {
        sync::with_lock(&self.inner.lock, || {
            if self.len() == 0 {
                return Err(Error::Empty);
            }
            self.pop()
        })
    }

    /// Mark one previously gotten item as processed. Calling more times
    /// than items were put is a state error.
    pub fn task_done(&self) -> Result<()> {
        sync::with_lock(&self.inner.lock, || {
            let drained = {
                let mut st = self.inner.state.lock();
                if st.unfinished == 0 {
                    return Err(Error::state("task_done() called too many times"));
                }
                st.unfinished -= 1;
                st.unfinished == 0
            };
            if drained {
                self.inner.all_tasks_done.notify_all()?;
            }
            Ok(())
        })
    }

    /// Suspend until every put item has been marked done.
    pub fn join(&self) -> Result<()> {
        sync::with_lock(&self.inner.lock, || {
            while self.inner.state.lock().unfinished > 0 {
                self.inner.all_tasks_done.wait(None)?;
            }
            Ok(())
        })
    }

    pub fn qsize(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.inner.maxsize > 0 && self.len() >= self.inner.maxsize
    }

    fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    fn push(&self, item: T) {
        let mut st = self.inner.state.lock();
        st.items.push_back(item);
        st.unfinished += 1;
    }

    fn pop(&self) -> Result<T> {
        let item = self.inner.state.lock().items.pop_front();
        match item {
            Some(item) => {
                self.inner.not_full.notify(1)?;
                Ok(item)
            }
            // Unreachable: callers hold the mutex and checked emptiness.
            None => Err(Error::Empty),
        }
    }
}
