//! rust-archiver library crate.
//!
//! Exposes every component so integration tests can wire them with fakes.

pub mod bus;
pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod modules;
pub mod monitor;
pub mod notification;
pub mod pipeline;
pub mod recorder;
pub mod services;
pub mod status;
pub mod task;
pub mod uploader;
pub mod utils;

pub use error::{Error, Result};
