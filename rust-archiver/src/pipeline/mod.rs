//! Post-capture pipeline: upload the artifact, then announce it.

mod dispatcher;

pub use dispatcher::{Backend, Dispatcher};
