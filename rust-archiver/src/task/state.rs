//! Task lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle step of a capture task.
///
/// `idle -> waiting_for_live -> recording -> muxing -> muxed -> uploading -> done`,
/// with `errored` and `cancelled` reachable from every non-terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStep {
    /// Discovered, waiting for a recorder to pick it up.
    #[default]
    Idle,
    /// The capture tool is waiting for the stream to start.
    WaitingForLive,
    /// Fragments are being downloaded.
    Recording,
    /// The capture tool is merging the final file.
    Muxing,
    /// The final file exists, waiting for upload.
    Muxed,
    /// Upload and notification backends are running.
    Uploading,
    /// Uploaded and notified.
    Done,
    /// A capture or backend failure.
    Errored,
    /// Deliberately stopped.
    Cancelled,
}

impl TaskStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WaitingForLive => "waiting_for_live",
            Self::Recording => "recording",
            Self::Muxing => "muxing",
            Self::Muxed => "muxed",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "waiting_for_live" => Some(Self::WaitingForLive),
            "recording" => Some(Self::Recording),
            "muxing" => Some(Self::Muxing),
            "muxed" => Some(Self::Muxed),
            "uploading" => Some(Self::Uploading),
            "done" => Some(Self::Done),
            "errored" => Some(Self::Errored),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// `done`, `errored` and `cancelled` end the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }

    /// Terminal steps are sticky; every other step may move anywhere.
    pub fn can_transition_to(&self, target: TaskStep) -> bool {
        *self == target || !self.is_terminal()
    }

    pub fn transition_to(&self, target: TaskStep) -> Result<TaskStep, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for TaskStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
