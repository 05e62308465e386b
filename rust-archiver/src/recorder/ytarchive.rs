//! ytarchive process supervisor.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Debounce, OutputParser, OutputRecordReader, Recorder, RecorderState, Recording};
use crate::task::{Task, TaskRegistry, TaskStep};
use crate::{Error, Result};
use process_utils::CommandExt;

/// Minimum spacing between progress writes to the registry.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// ytarchive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtarchiveConfig {
    /// Path to the ytarchive executable.
    #[serde(default = "default_executable")]
    pub executable_path: String,
    /// Quality selector passed as the last argument.
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Extra flags, inserted after the fixed `--wait --merge`.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Watch URL template; `{video_id}` is substituted.
    #[serde(default = "default_video_url")]
    pub video_url: String,
}

fn default_executable() -> String {
    "ytarchive".to_string()
}

fn default_quality() -> String {
    "best".to_string()
}

fn default_video_url() -> String {
    "https://www.youtube.com/watch?v={video_id}".to_string()
}

impl Default for YtarchiveConfig {
    fn default() -> Self {
        Self {
            executable_path: default_executable(),
            quality: default_quality(),
            flags: Vec::new(),
            video_url: default_video_url(),
        }
    }
}

pub struct YtarchiveRecorder {
    config: YtarchiveConfig,
    registry: Arc<TaskRegistry>,
}

impl YtarchiveRecorder {
    pub fn new(config: YtarchiveConfig, registry: Arc<TaskRegistry>) -> Self {
        Self { config, registry }
    }

    fn build_args(&self, video_id: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(self.config.flags.len() + 4);

        let has_wait = self
            .config
            .flags
            .iter()
            .any(|f| f == "--wait" || f == "-w");
        if !has_wait {
            args.push("--wait".to_string());
        }
        args.push("--merge".to_string());
        args.extend(self.config.flags.iter().cloned());
        args.push(self.config.video_url.replace("{video_id}", video_id));
        args.push(self.config.quality.clone());

        args
    }

    /// Mark the task errored and build the matching error.
    async fn fail(&self, id: &str, message: String) -> Error {
        error!(video_id = %id, "{}", message);
        if let Err(e) = self.registry.update_step_async(id, TaskStep::Errored).await {
            return e;
        }
        let _ = self.registry.log_event(id, message.clone());
        Error::process(message)
    }

    /// Mirror the parser state into the registry.
    fn reflect(
        &self,
        id: &str,
        parser: &OutputParser,
        debounce: &mut Debounce,
        last_step: &mut Option<TaskStep>,
    ) -> Result<()> {
        let Some(step) = parser.state.task_step() else {
            return Ok(());
        };

        if *last_step != Some(step) {
            self.registry.update_step(id, step)?;
            *last_step = Some(step);
        }

        if step == TaskStep::Recording
            && let Some(size) = &parser.total_size
            && debounce.check()
        {
            self.registry.update_progress(id, size.clone())?;
        }
        Ok(())
    }
}

fn spawn_reader<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = OutputRecordReader::new(stream);
        loop {
            match reader.next_record().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Error reading ytarchive output");
                    break;
                }
            }
        }
    });
}

/// Wait for the child, interrupting it once `cancel` fires.
async fn supervise(mut child: Child, cancel: CancellationToken) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = process_utils::wait_for_exit(&mut child) => return status,
        _ = cancel.cancelled() => {}
    }

    debug!(pid = ?child.id(), "Interrupting ytarchive");
    if let Err(e) = process_utils::send_interrupt(&mut child) {
        warn!(error = %e, "Failed to interrupt ytarchive, killing it");
        let _ = child.start_kill();
    }
    process_utils::wait_for_exit(&mut child).await
}

fn take_output(child: &mut Child) -> Option<(ChildStdout, ChildStderr)> {
    Some((child.stdout.take()?, child.stderr.take()?))
}

/// Kill a child that will not be supervised and reap it.
async fn abandon(mut child: Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "ytarchive already gone");
    }
    if let Err(e) = process_utils::wait_for_exit(&mut child).await {
        warn!(error = %e, "Failed to reap ytarchive");
    }
}

fn resolve_output(workdir: &Path, output: &str) -> PathBuf {
    let path = PathBuf::from(output);
    if path.is_absolute() {
        path
    } else {
        workdir.join(path)
    }
}

#[async_trait]
impl Recorder for YtarchiveRecorder {
    fn kind(&self) -> &'static str {
        "ytarchive"
    }

    async fn version(&self) -> Result<String> {
        let output = process_utils::tokio_command(&self.config.executable_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::process(format!(
                    "Failed to run {}: {}",
                    self.config.executable_path, e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.lines().next().unwrap_or_default().trim();
        Ok(first.strip_prefix("ytarchive ").unwrap_or(first).to_string())
    }

    async fn record(&self, task: &Task, cancel: CancellationToken) -> Result<Recording> {
        let id = task.id.as_str();
        self.registry.log_event(id, "Starting ytarchive")?;

        let args = self.build_args(id);
        debug!(video_id = %id, ?args, "Starting ytarchive");

        let mut command = process_utils::tokio_command(&self.config.executable_path);
        command
            .args(&args)
            .current_dir(&task.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .detached();

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(self
                    .fail(id, format!("Failed to spawn ytarchive: {}", e))
                    .await);
            }
        };

        let (stdout, stderr) = match take_output(&mut child) {
            Some(pipes) => pipes,
            None => {
                abandon(child).await;
                return Err(self
                    .fail(id, "Failed to capture ytarchive output".to_string())
                    .await);
            }
        };

        let (line_tx, mut line_rx) = mpsc::channel(256);
        spawn_reader(stdout, line_tx.clone());
        spawn_reader(stderr, line_tx);

        let child_cancel = cancel.child_token();
        let waiter = tokio::spawn(supervise(child, child_cancel.clone()));

        let mut parser = OutputParser::new();
        let mut debounce = Debounce::new(PROGRESS_INTERVAL);
        let mut last_step = None;
        let mut orphaned = false;

        while let Some(line) = line_rx.recv().await {
            parser.parse_line(&line);
            if orphaned {
                continue;
            }
            if let Err(e) = self.reflect(id, &parser, &mut debounce, &mut last_step) {
                if e.is_not_found() {
                    warn!(video_id = %id, "Task disappeared, stopping ytarchive");
                    orphaned = true;
                    child_cancel.cancel();
                } else {
                    warn!(video_id = %id, error = %e, "Failed to update task");
                }
            }
        }

        let status = waiter
            .await
            .map_err(|e| Error::process(format!("ytarchive waiter failed: {}", e)))?;

        if orphaned {
            return Err(Error::not_found("Task", id));
        }

        if parser.state == RecorderState::Interrupted || cancel.is_cancelled() {
            info!(video_id = %id, "ytarchive interrupted");
            self.registry.update_step(id, TaskStep::Cancelled)?;
            return Err(Error::Cancelled);
        }

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return Err(self
                    .fail(id, format!("Failed to wait for ytarchive: {}", e))
                    .await);
            }
        };
        if !status.success() {
            let last = parser.last_output.clone().unwrap_or_default();
            return Err(self
                .fail(id, format!("ytarchive exited with {}: {}", status, last))
                .await);
        }

        match (parser.state, parser.output_file.as_deref()) {
            (RecorderState::Finished, Some(output)) => {
                let file_path = resolve_output(&task.working_directory, output);
                self.registry.update_step(id, TaskStep::Muxed)?;
                self.registry
                    .log_event(id, format!("Recorded to {}", file_path.display()))?;
                info!(video_id = %id, path = %file_path.display(), "ytarchive finished");
                Ok(Recording::for_task(task, file_path))
            }
            (RecorderState::Errored, _) => {
                let last = parser.last_output.clone().unwrap_or_default();
                Err(self
                    .fail(id, format!("ytarchive reported an error: {}", last))
                    .await)
            }
            (state, _) => Err(self
                .fail(
                    id,
                    format!("ytarchive exited without a final file (state {:?})", state),
                )
                .await),
        }
    }
}
