/*!
 * Readiness Multiplexer
 *
 * Poll-style interest registration over the backend's readiness futures.
 * One call waits on every registered descriptor at once, returns as soon
 * as any is ready, and reports an invalid descriptor immediately as NVAL
 * instead of hanging.
 */

use crate::core::{Error, Facility, Result};
use crate::runtime::{self, native, portal};
use bitflags::bitflags;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use std::collections::BTreeMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

bitflags! {
    /// Readiness event mask, numerically compatible with poll(2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: u16 {
        const IN = 0x001;
        const OUT = 0x004;
        const ERR = 0x008;
        const HUP = 0x010;
        const NVAL = 0x020;
    }
}

/// Level-triggered readiness multiplexer over registered descriptors.
pub struct Poller {
    registered: BTreeMap<RawFd, Events>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            registered: BTreeMap::new(),
        }
    }

    /// Register interest in `events` for `fd`, replacing any previous mask.
    pub fn register(&mut self, fd: RawFd, events: Events) {
        self.registered.insert(fd, events);
    }

    /// Change the mask of an already registered descriptor.
    pub fn modify(&mut self, fd: RawFd, events: Events) -> Result<()> {
        match self.registered.get_mut(&fd) {
            Some(mask) => {
                *mask = events;
                Ok(())
            }
            None => Err(Error::state(format!("fd {fd} is not registered"))),
        }
    }

    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        match self.registered.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(Error::state(format!("fd {fd} is not registered"))),
        }
    }

    /// Wait until at least one registered descriptor is ready.
    ///
    /// Returns the ready `(fd, events)` pairs; an elapsed timeout is the
    /// empty vec, never an error. An invalid descriptor completes the call
    /// immediately with NVAL set for it. With nothing registered the call
    /// sleeps out its timeout, or indefinitely when none is given.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Events)>> {
        let ctx = runtime::context()?;
        if native::active() || ctx.is_excluded(Facility::Io) {
            return self.poll_native(timeout);
        }
        if self.registered.is_empty() {
            return match timeout {
                Some(duration) => {
                    crate::time::sleep(duration)?;
                    Ok(Vec::new())
                }
                // poll(2) with no descriptors and no timeout sleeps
                // forever; only cancellation ends the wait.
                None => {
                    portal::submit(Facility::Io, None, async {
                        futures::future::pending::<()>().await;
                        Ok(())
                    })?;
                    Ok(Vec::new())
                }
            };
        }

        let mut waits: FuturesUnordered<BoxFuture<'static, (RawFd, Events)>> =
            FuturesUnordered::new();
        for (&fd, &mask) in &self.registered {
            if mask.contains(Events::IN) {
                waits.push(outcome_future(fd, Events::IN, ctx.scheduler.wait_readable(fd)));
            }
            if mask.contains(Events::OUT) {
                waits.push(outcome_future(fd, Events::OUT, ctx.scheduler.wait_writable(fd)));
            }
        }

        let ready = portal::submit(Facility::Io, timeout, async move {
            let mut ready = Vec::new();
            if let Some(first) = waits.next().await {
                ready.push(first);
                // Collect whatever else is already complete, without
                // waiting further.
                while let Some(Some(more)) = waits.next().now_or_never() {
                    ready.push(more);
                }
            }
            Ok(ready)
        });
        match ready {
            Ok(pairs) => Ok(merge(pairs)),
            Err(Error::Timeout) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// True blocking poll(2) on the carrier.
    fn poll_native(&self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Events)>> {
        let mut invalid: Vec<(RawFd, Events)> = Vec::new();
        let mut fds: Vec<PollFd> = Vec::new();
        for (&fd, &mask) in &self.registered {
            if fd < 0 {
                invalid.push((fd, Events::NVAL));
                continue;
            }
            // SAFETY: the caller keeps registered descriptors open across
            // the poll call.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            fds.push(PollFd::new(borrowed, native_flags(mask)));
        }
        if !invalid.is_empty() {
            return Ok(invalid);
        }

        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(duration) => {
                let millis = i32::try_from(duration.as_millis())
                    .map_err(|_| Error::state("poll timeout out of range"))?;
                PollTimeout::try_from(millis)
                    .map_err(|_| Error::state("poll timeout out of range"))?
            }
        };
        nix::poll::poll(&mut fds, timeout)?;

        let mut ready = Vec::new();
        // `fds` was built in registration order, so zip recovers each fd.
        for ((&fd, _), pollfd) in self.registered.iter().zip(&fds) {
            let revents = pollfd.revents().unwrap_or(PollFlags::empty());
            let events = emulated_events(revents);
            if !events.is_empty() {
                ready.push((fd, events));
            }
        }
        Ok(ready)
    }
}

/// Wrap a readiness future so failures report as events instead of
/// aborting the whole poll: a bad descriptor is NVAL, anything else ERR.
fn outcome_future(
    fd: RawFd,
    event: Events,
    wait: BoxFuture<'static, std::io::Result<()>>,
) -> BoxFuture<'static, (RawFd, Events)> {
    Box::pin(async move {
        match wait.await {
            Ok(()) => (fd, event),
            Err(e) if e.raw_os_error() == Some(Errno::EBADF as i32) => (fd, Events::NVAL),
            Err(_) => (fd, Events::ERR),
        }
    })
}

/// Merge per-interest completions into one mask per descriptor.
fn merge(pairs: Vec<(RawFd, Events)>) -> Vec<(RawFd, Events)> {
    let mut merged: BTreeMap<RawFd, Events> = BTreeMap::new();
    for (fd, events) in pairs {
        *merged.entry(fd).or_insert(Events::empty()) |= events;
    }
    merged.into_iter().collect()
}

fn native_flags(mask: Events) -> PollFlags {
    let mut flags = PollFlags::empty();
    if mask.contains(Events::IN) {
        flags |= PollFlags::POLLIN;
    }
    if mask.contains(Events::OUT) {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn emulated_events(revents: PollFlags) -> Events {
    let mut events = Events::empty();
    if revents.contains(PollFlags::POLLIN) {
        events |= Events::IN;
    }
    if revents.contains(PollFlags::POLLOUT) {
        events |= Events::OUT;
    }
    if revents.contains(PollFlags::POLLERR) {
        events |= Events::ERR;
    }
    if revents.contains(PollFlags::POLLHUP) {
        events |= Events::HUP;
    }
    if revents.contains(PollFlags::POLLNVAL) {
        events |= Events::NVAL;
    }
    events
}
