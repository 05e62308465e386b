//! Sequential upload and notification of a finished recording.
//!
//! Every accepting uploader runs in configuration order, then every accepting
//! notifier is told about every upload. The first failure marks the task
//! `errored` and skips the remaining stages; nothing is retried.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::notification::Notifier;
use crate::recorder::Recording;
use crate::task::{TaskRegistry, TaskStep};
use crate::uploader::{UploadResult, Uploader};
use crate::{Error, Result};

/// A configured backend with its routing tags.
pub struct Backend<T: ?Sized> {
    name: String,
    tags: BTreeSet<String>,
    inner: Arc<T>,
}

impl<T: ?Sized> Backend<T> {
    pub fn new(name: impl Into<String>, tags: BTreeSet<String>, inner: Arc<T>) -> Self {
        Self {
            name: name.into(),
            tags,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// An untagged backend accepts every task.
    pub fn accepts(&self, task_tags: &BTreeSet<String>) -> bool {
        self.tags.is_empty() || !self.tags.is_disjoint(task_tags)
    }
}

pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    uploaders: Vec<Backend<dyn Uploader>>,
    notifiers: Vec<Backend<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        uploaders: Vec<Backend<dyn Uploader>>,
        notifiers: Vec<Backend<dyn Notifier>>,
    ) -> Self {
        Self {
            registry,
            uploaders,
            notifiers,
        }
    }

    /// Upload and announce `recording`, driving its task to `done`.
    ///
    /// Returns [`Error::NotFound`] untouched when the task is gone, and
    /// [`Error::Cancelled`] after marking the task `cancelled`.
    pub async fn dispatch(&self, recording: &Recording, cancel: &CancellationToken) -> Result<()> {
        let id = recording.video_id.as_str();
        let task = self.registry.get(id)?;

        let uploaders: Vec<_> = self
            .uploaders
            .iter()
            .filter(|b| b.accepts(&task.tags))
            .collect();
        if uploaders.is_empty() {
            return Err(self
                .fail(id, Error::Upload("no uploader accepts this task".to_string()))
                .await);
        }

        self.registry.update_step(id, TaskStep::Uploading)?;

        let mut uploads: Vec<UploadResult> = Vec::with_capacity(uploaders.len());
        for backend in uploaders {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(id)),
                result = backend.inner.upload(recording) => result,
            };
            match result {
                Ok(upload) => {
                    self.registry.log_event(
                        id,
                        format!("Uploaded via {}: {}", backend.name, upload.public_url),
                    )?;
                    info!(
                        video_id = %id,
                        uploader = %backend.name,
                        url = %upload.public_url,
                        "Upload complete"
                    );
                    uploads.push(upload);
                }
                Err(e) => {
                    return Err(self
                        .fail(
                            id,
                            Error::Upload(format!(
                                "{} ({}): {}",
                                backend.name,
                                backend.inner.kind(),
                                e
                            )),
                        )
                        .await);
                }
            }
        }

        for backend in self.notifiers.iter().filter(|b| b.accepts(&task.tags)) {
            for upload in &uploads {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(self.cancelled(id)),
                    result = backend.inner.notify(upload) => result,
                };
                if let Err(e) = result {
                    if e.is_not_found() {
                        return Err(e);
                    }
                    return Err(self
                        .fail(
                            id,
                            Error::Notification(format!(
                                "{} ({}): {}",
                                backend.name,
                                backend.inner.kind(),
                                e
                            )),
                        )
                        .await);
                }
                debug!(video_id = %id, notifier = %backend.name, "Notified");
            }
        }

        self.registry.update_step_async(id, TaskStep::Done).await?;
        info!(video_id = %id, "Task done");
        Ok(())
    }

    /// Mark the task `errored` and hand back the error to report.
    async fn fail(&self, id: &str, err: Error) -> Error {
        if let Err(e) = self.registry.update_step_async(id, TaskStep::Errored).await {
            return e;
        }
        if let Err(e) = self.registry.log_event(id, err.to_string()) {
            return e;
        }
        error!(video_id = %id, error = %err, "Pipeline failed");
        err
    }

    fn cancelled(&self, id: &str) -> Error {
        match self.registry.update_step(id, TaskStep::Cancelled) {
            Ok(()) => {
                info!(video_id = %id, "Pipeline cancelled");
                Error::Cancelled
            }
            Err(e) => e,
        }
    }
}
