//! Local filesystem "upload": moves the artifact into a served directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{UploadResult, Uploader};
use crate::recorder::Recording;
use crate::utils::fs;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Destination directory, created on demand.
    pub path: PathBuf,
    /// Public URL the destination directory is served under.
    pub base_url: String,
}

pub struct LocalUploader {
    config: LocalConfig,
}

impl LocalUploader {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    fn public_url(&self, file_name: &str) -> String {
        let mut url = self.config.base_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(&urlencoding::encode(file_name));
        url
    }
}

#[async_trait]
impl Uploader for LocalUploader {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, recording: &Recording) -> Result<UploadResult> {
        fs::ensure_dir_all(&self.config.path).await?;

        let dest = fs::move_file(&recording.file_path, &self.config.path).await?;
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Upload(format!("no file name in {}", dest.display())))?;

        info!(
            video_id = %recording.video_id,
            dest = %dest.display(),
            "Moved recording"
        );
        Ok(UploadResult::for_recording(
            recording,
            self.public_url(&file_name),
        ))
    }
}
