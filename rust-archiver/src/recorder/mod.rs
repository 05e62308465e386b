//! Capture-tool supervision.
//!
//! A [`Recorder`] runs the external capture tool for one task, mirrors its
//! progress into the task registry and hands back the finished artifact.

mod debounce;
mod output_record_reader;
mod parser;
mod ytarchive;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::task::Task;

pub use debounce::Debounce;
pub use output_record_reader::OutputRecordReader;
pub use parser::{OutputParser, RecorderState, strip_ansi};
pub use ytarchive::{YtarchiveConfig, YtarchiveRecorder};

/// A finished capture, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub file_path: PathBuf,
}

impl Recording {
    pub fn for_task(task: &Task, file_path: PathBuf) -> Self {
        Self {
            video_id: task.id.clone(),
            title: task.title.clone(),
            channel_id: task.channel_id.clone(),
            channel_name: task.channel_name.clone(),
            file_path,
        }
    }
}

#[async_trait]
pub trait Recorder: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Version string reported by the capture tool. Fails when the tool is
    /// missing.
    async fn version(&self) -> Result<String>;

    /// Capture `task` until the tool exits or `cancel` fires.
    ///
    /// Returns [`Error::Cancelled`](crate::Error::Cancelled) for deliberate
    /// stops and [`Error::NotFound`](crate::Error::NotFound) when the task
    /// vanished from the registry mid-capture.
    async fn record(&self, task: &Task, cancel: CancellationToken) -> Result<Recording>;
}
