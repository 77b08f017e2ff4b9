/*!
 * Blocking Descriptor I/O
 *
 * `read`/`write` with conventional blocking semantics: the descriptor is
 * switched to non-blocking once, then each would-block result suspends the
 * calling task on readiness instead of the carrier. Native mode issues the
 * plain syscall.
 */

use crate::core::{Facility, Result};
use crate::runtime::{self, native, portal};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::os::fd::{BorrowedFd, RawFd};

/// Read up to `buf.len()` bytes, suspending until the descriptor is
/// readable. Returns 0 at end of file.
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    let ctx = runtime::context()?;
    if native::active() || ctx.is_excluded(Facility::Io) {
        return Ok(nix::unistd::read(fd, buf)?);
    }
    set_nonblocking(fd)?;
    loop {
        match nix::unistd::read(fd, buf) {
            Ok(n) => return Ok(n),
            Err(Errno::EAGAIN) => wait_readable(fd)?,
            Err(errno) => return Err(errno.into()),
        }
    }
}

/// Write from `buf`, suspending until the descriptor is writable. Returns
/// the number of bytes written, which may be short.
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize> {
    let ctx = runtime::context()?;
    // SAFETY: the caller keeps `fd` open for the duration of the call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    if native::active() || ctx.is_excluded(Facility::Io) {
        return Ok(nix::unistd::write(borrowed, buf)?);
    }
    set_nonblocking(fd)?;
    loop {
        match nix::unistd::write(borrowed, buf) {
            Ok(n) => return Ok(n),
            Err(Errno::EAGAIN) => wait_writable(fd)?,
            Err(errno) => return Err(errno.into()),
        }
    }
}

fn wait_readable(fd: RawFd) -> Result<()> {
    let ctx = runtime::context()?;
    let ready = ctx.scheduler.wait_readable(fd);
    portal::submit(Facility::Io, None, async move {
        ready.await?;
        Ok(())
    })
}

fn wait_writable(fd: RawFd) -> Result<()> {
    let ctx = runtime::context()?;
    let ready = ctx.scheduler.wait_writable(fd);
    portal::submit(Facility::Io, None, async move {
        ready.await?;
        Ok(())
    })
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    if !flags.contains(OFlag::O_NONBLOCK) {
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    }
    Ok(())
}
