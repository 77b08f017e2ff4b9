/*!
 * I/O Readiness Layer
 *
 * Descriptor-level blocking reads and writes plus a poll-style readiness
 * multiplexer, both suspending only the calling logical task. The caller
 * owns the descriptor throughout; the emulation never closes it.
 */

mod fd;
pub mod poll;

pub use fd::{read, write};
pub use poll::{Events, Poller};
