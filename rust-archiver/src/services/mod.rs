//! Service layer: builds every component and runs them under one
//! cancellation scope.

pub mod container;

pub use container::{Components, ServiceContainer};
