/*!
 * Threadmill
 *
 * Preemptive-style threads, blocking synchronization, and blocking I/O
 * retrofitted onto a single-threaded cooperative scheduler. Each logical
 * thread runs on its own carrier OS thread, but a process-wide baton
 * ensures at most one runs user code at a time; blocking calls hand their
 * operation to the backend driver through a per-task bridge portal and
 * suspend only the calling logical thread.
 *
 * ```no_run
 * use std::time::Duration;
 *
 * # fn main() -> threadmill::Result<()> {
 * let rt = threadmill::setup(threadmill::Config::default())?;
 * rt.run(|| -> threadmill::Result<()> {
 *     let worker = threadmill::Thread::spawn(|| {
 *         threadmill::time::sleep(Duration::from_millis(100))?;
 *         Ok(())
 *     })?;
 *     worker.join(None)?;
 *     Ok(())
 * })??;
 * # Ok(())
 * # }
 * ```
 */

pub mod core;
pub mod exitcall;
pub mod io;
pub mod registry;
pub mod runtime;
pub mod sync;
pub mod thread;
pub mod time;

pub use crate::core::{Error, Facility, Result, TaskId};
pub use registry::runner_scope;
pub use runtime::native;
pub use runtime::{current, setup, Backend, Config, Runtime};
pub use thread::Thread;
