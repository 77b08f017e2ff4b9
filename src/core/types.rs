/*!
 * Core Types
 * Common types used across the emulation layer
 */

/// Logical task identity. Monotonically increasing, never reused.
pub type TaskId = u64;

/// Identity of the synthetic root task representing the carrier's
/// original thread.
pub const ROOT_TASK_ID: TaskId = 0;

/// One nameable emulated surface, for the setup exclusion set.
///
/// An excluded facility behaves as if permanently in native mode: its
/// operations route to the true blocking primitive and never suspend
/// cooperatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facility {
    Time,
    Thread,
    Sync,
    Queue,
    Io,
    ExitCall,
}
