/*!
 * Core Module
 * Error taxonomy and shared types
 */

pub mod errors;
pub mod types;

pub use errors::{Error, Result};
pub use types::{Facility, TaskId, ROOT_TASK_ID};
