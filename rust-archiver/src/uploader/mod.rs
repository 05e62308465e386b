//! Upload backends.

mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::{LocalConfig, LocalUploader};

use crate::Result;
use crate::recorder::Recording;

/// Where an artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub video_id: String,
    pub public_url: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
}

impl UploadResult {
    pub fn for_recording(recording: &Recording, public_url: String) -> Self {
        Self {
            video_id: recording.video_id.clone(),
            public_url,
            title: recording.title.clone(),
            channel_id: recording.channel_id.clone(),
            channel_name: recording.channel_name.clone(),
        }
    }
}

#[async_trait]
pub trait Uploader: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn upload(&self, recording: &Recording) -> Result<UploadResult>;
}
