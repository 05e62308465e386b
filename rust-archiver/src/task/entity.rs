//! Task entities.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStep;

/// A discovered video, the input to [`TaskRegistry::insert`](super::TaskRegistry::insert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
}

/// One entry of a task's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// One capture job for a single discovered video.
///
/// Values handed out by the registry are snapshots; mutate through the
/// registry only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub step: TaskStep,
    pub logs: Vec<TaskLogEntry>,
    /// Free-form progress, e.g. the downloaded size. Last writer wins.
    pub progress: String,
    pub created_at: DateTime<Utc>,
    pub last_step_update: DateTime<Utc>,
    pub working_directory: PathBuf,
    pub tags: BTreeSet<String>,
}

impl Task {
    pub(crate) fn new(video: Video, working_directory: PathBuf, tags: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            id: video.id,
            title: video.title,
            channel_id: video.channel_id,
            channel_name: video.channel_name,
            step: TaskStep::Idle,
            logs: Vec::new(),
            progress: String::new(),
            created_at: now,
            last_step_update: now,
            working_directory,
            tags,
        }
    }

    pub(crate) fn push_log(&mut self, message: impl Into<String>) {
        self.logs.push(TaskLogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }
}
