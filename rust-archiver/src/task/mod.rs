//! Capture tasks and the registry that owns them.

mod entity;
mod registry;
mod state;

pub use entity::{Task, TaskLogEntry, Video};
pub use registry::{ErrorCleanupPolicy, TaskRegistry};
pub use state::TaskStep;
