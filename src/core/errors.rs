/*!
 * Error Types
 * Centralized error handling with thiserror and miette support
 */

use miette::Diagnostic;
use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Cancellation and timeouts flow through every blocking facility, so a
/// single enum is used instead of per-module error types. Misuse of a
/// facility (wrong owner, double start, wait without the lock, ...) is
/// always reported immediately via [`Error::InvalidState`], never silently
/// corrected.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("runtime not initialized")]
    #[diagnostic(
        code(threadmill::setup::not_initialized),
        help("Call threadmill::setup() before using any emulated facility.")
    )]
    NotInitialized,

    #[error("backend already selected: {0}")]
    #[diagnostic(
        code(threadmill::setup::backend_mismatch),
        help("Exactly one cooperative backend may be used per process.")
    )]
    BackendMismatch(crate::runtime::Backend),

    #[error("no bridge portal installed for this thread")]
    #[diagnostic(
        code(threadmill::setup::portal_missing),
        help("Blocking facilities may only be called from a spawned logical thread or an attached carrier thread.")
    )]
    PortalMissing,

    #[error("invalid state: {0}")]
    #[diagnostic(
        code(threadmill::state::invalid),
        help("The operation is not legal for the facility's current state or owner.")
    )]
    InvalidState(String),

    #[error("operation timed out")]
    #[diagnostic(code(threadmill::timeout))]
    Timeout,

    #[error("barrier is broken")]
    #[diagnostic(
        code(threadmill::sync::broken_barrier),
        help("A waiter timed out, the barrier action failed, or reset() was called. Call reset() to reuse the barrier.")
    )]
    BrokenBarrier,

    #[error("queue is full")]
    #[diagnostic(code(threadmill::queue::full))]
    Full,

    #[error("queue is empty")]
    #[diagnostic(code(threadmill::queue::empty))]
    Empty,

    #[error("operation cancelled")]
    #[diagnostic(
        code(threadmill::cancelled),
        help("The owning task was cancelled while suspended. This is a cooperative outcome, not a failure.")
    )]
    Cancelled,

    #[error("I/O error: {0}")]
    #[diagnostic(code(threadmill::io))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this outcome is cooperative cancellation.
    ///
    /// Cancellation unwinds cleanly through every suspension point and is
    /// never routed to the uncaught-failure hook.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io(std::io::Error::from_raw_os_error(errno as i32))
    }
}

/// Common result type for emulated facilities
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Timeout.is_cancelled());
        assert!(!Error::BrokenBarrier.is_cancelled());
    }

    #[test]
    fn test_errno_conversion() {
        let err = Error::from(nix::errno::Errno::EBADF);
        match err {
            Error::Io(e) => assert_eq!(e.raw_os_error(), Some(nix::errno::Errno::EBADF as i32)),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
