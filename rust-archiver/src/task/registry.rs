//! The authoritative in-memory registry of capture tasks.
//!
//! Every mutation goes through one `parking_lot::RwLock`, which makes
//! operations linearizable per task while readers take cheap snapshots.
//! Filesystem work (creating and removing working directories) never happens
//! while the lock is held.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Task, TaskStep, Video};
use crate::utils::fs;
use crate::{Error, Result};

/// What happens to a task's working directory when it reaches `errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCleanupPolicy {
    /// Remove the directory only when it holds nothing worth recovering.
    #[default]
    IfEmpty,
    /// Always remove the directory.
    Always,
}

struct Slot {
    seq: u64,
    task: Task,
    /// Set by `claim_next`, cleared on every step change.
    consumed: bool,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Slot>,
    /// Insertion order, keyed by a monotonically increasing sequence number.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

enum Cleanup {
    Remove(PathBuf),
    RemoveIfEmpty(PathBuf),
}

impl Cleanup {
    fn run(self) {
        match self {
            Self::Remove(dir) => fs::remove_dir_best_effort(&dir),
            Self::RemoveIfEmpty(dir) => fs::remove_dir_if_empty(&dir),
        }
    }
}

pub struct TaskRegistry {
    inner: RwLock<Inner>,
    working_root: PathBuf,
    error_cleanup: ErrorCleanupPolicy,
}

impl TaskRegistry {
    /// Per-task working directories are created under `working_root`.
    pub fn new(working_root: impl Into<PathBuf>, error_cleanup: ErrorCleanupPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            working_root: working_root.into(),
            error_cleanup,
        }
    }

    pub fn working_root(&self) -> &Path {
        &self.working_root
    }

    /// Register a newly discovered video.
    ///
    /// Duplicate ids are rejected with [`Error::TaskAlreadyExists`] and the
    /// existing task is left untouched.
    pub fn insert(&self, video: Video, tags: BTreeSet<String>) -> Result<Task> {
        if self.inner.read().tasks.contains_key(&video.id) {
            return Err(Error::TaskAlreadyExists(video.id));
        }

        let workdir = self.create_working_directory(&video.id)?;
        let mut task = Task::new(video, workdir, tags);
        task.push_log("Task created");

        let mut inner = self.inner.write();
        if inner.tasks.contains_key(&task.id) {
            // Lost a race against a concurrent insert of the same id.
            drop(inner);
            fs::remove_dir_best_effort(&task.working_directory);
            return Err(Error::TaskAlreadyExists(task.id));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, task.id.clone());
        inner.tasks.insert(
            task.id.clone(),
            Slot {
                seq,
                task: task.clone(),
                consumed: false,
            },
        );
        drop(inner);

        info!(
            video_id = %task.id,
            workdir = %task.working_directory.display(),
            "Task created"
        );
        Ok(task)
    }

    fn create_working_directory(&self, id: &str) -> Result<PathBuf> {
        fs::ensure_dir_all_sync_with_op("creating working root", &self.working_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("task__{}__", id))
            .tempdir_in(&self.working_root)
            .map_err(|e| fs::io_error("creating working directory", &self.working_root, e))?;
        Ok(dir.keep())
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.inner
            .read()
            .tasks
            .get(id)
            .map(|slot| slot.task.clone())
            .ok_or_else(|| Error::not_found("Task", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().tasks.contains_key(id)
    }

    /// Move a task to `step`.
    ///
    /// Setting the current step again is a no-op. Once a task is terminal,
    /// later step changes are ignored. Reaching `done` removes the working
    /// directory; reaching `errored` applies the configured cleanup policy.
    pub fn update_step(&self, id: &str, step: TaskStep) -> Result<()> {
        if let Some(cleanup) = self.apply_step(id, step)? {
            cleanup.run();
        }
        Ok(())
    }

    /// Same as [`update_step`](Self::update_step), with the directory
    /// cleanup moved to the blocking pool.
    pub async fn update_step_async(&self, id: &str, step: TaskStep) -> Result<()> {
        if let Some(cleanup) = self.apply_step(id, step)? {
            if let Err(e) = tokio::task::spawn_blocking(move || cleanup.run()).await {
                warn!(video_id = %id, error = %e, "Working directory cleanup panicked");
            }
        }
        Ok(())
    }

    fn apply_step(&self, id: &str, step: TaskStep) -> Result<Option<Cleanup>> {
        let cleanup = {
            let mut inner = self.inner.write();
            let slot = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| Error::not_found("Task", id))?;
            let current = slot.task.step;

            if current == step {
                return Ok(None);
            }
            if let Err(e) = current.transition_to(step) {
                debug!(video_id = %id, error = %e, "Ignoring step change on finished task");
                return Ok(None);
            }

            let message = format!("Task state changed to {}", step);
            slot.task.step = step;
            slot.task.last_step_update = Utc::now();
            slot.task.push_log(message.clone());
            slot.consumed = false;
            debug!(video_id = %id, "{}", message);

            let workdir = slot.task.working_directory.clone();
            match (step, self.error_cleanup) {
                (TaskStep::Done, _) | (TaskStep::Errored, ErrorCleanupPolicy::Always) => {
                    Some(Cleanup::Remove(workdir))
                }
                (TaskStep::Errored, ErrorCleanupPolicy::IfEmpty) => {
                    Some(Cleanup::RemoveIfEmpty(workdir))
                }
                _ => None,
            }
        };

        Ok(cleanup)
    }

    /// Replace the progress text. No history is kept.
    pub fn update_progress(&self, id: &str, progress: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Task", id))?;
        slot.task.progress = progress.into();
        Ok(())
    }

    /// Append a log entry without touching the step.
    pub fn log_event(&self, id: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let mut inner = self.inner.write();
        let slot = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Task", id))?;
        debug!(video_id = %id, "{}", message);
        slot.task.push_log(message);
        Ok(())
    }

    /// Point-in-time copy of every task, in insertion order.
    pub fn list_all(&self) -> Vec<Task> {
        let inner = self.inner.read();
        inner
            .order
            .values()
            .filter_map(|id| inner.tasks.get(id))
            .map(|slot| slot.task.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the oldest task sitting at `step` that nobody has claimed since
    /// its last step change.
    pub fn claim_next(&self, step: TaskStep) -> Option<Task> {
        let mut inner = self.inner.write();
        let Inner { tasks, order, .. } = &mut *inner;
        order.values().find_map(|id| {
            let slot = tasks.get_mut(id)?;
            if slot.task.step != step || slot.consumed {
                return None;
            }
            slot.consumed = true;
            Some(slot.task.clone())
        })
    }

    /// Retire terminal tasks whose last step change is older than `retention`.
    ///
    /// Returns the number of tasks removed. Working directories are left alone.
    pub fn clear_old(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut inner = self.inner.write();
        let expired: Vec<(u64, String)> = inner
            .tasks
            .iter()
            .filter(|(_, slot)| slot.task.step.is_terminal() && slot.task.last_step_update <= cutoff)
            .map(|(id, slot)| (slot.seq, id.clone()))
            .collect();

        for (seq, id) in &expired {
            inner.order.remove(seq);
            inner.tasks.remove(id);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Cleared old tasks");
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str) -> Video {
        Video {
            id: id.to_string(),
            title: format!("Title {}", id),
            channel_id: "UC123".to_string(),
            channel_name: "Channel".to_string(),
        }
    }

    fn registry(root: &Path) -> TaskRegistry {
        TaskRegistry::new(root, ErrorCleanupPolicy::IfEmpty)
    }

    #[test]
    fn test_insert_creates_idle_task_with_workdir() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());

        let task = reg.insert(video("a"), BTreeSet::new()).unwrap();

        assert_eq!(task.step, TaskStep::Idle);
        assert!(task.working_directory.is_dir());
        assert!(task.working_directory.starts_with(root.path()));
        assert_eq!(task.logs.len(), 1);
        assert_eq!(task.logs[0].message, "Task created");
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());

        let first = reg.insert(video("a"), BTreeSet::new()).unwrap();
        reg.update_progress("a", "1.0MiB").unwrap();

        let mut dup = video("a");
        dup.title = "Other".to_string();
        let err = reg.insert(dup, BTreeSet::new()).unwrap_err();

        assert!(matches!(err, Error::TaskAlreadyExists(ref id) if id == "a"));
        let stored = reg.get("a").unwrap();
        assert_eq!(stored.title, first.title);
        assert_eq!(stored.working_directory, first.working_directory);
        assert_eq!(stored.progress, "1.0MiB");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_update_step_same_step_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        reg.insert(video("a"), BTreeSet::new()).unwrap();
        reg.update_step("a", TaskStep::Recording).unwrap();
        let before = reg.get("a").unwrap();

        reg.update_step("a", TaskStep::Recording).unwrap();

        let after = reg.get("a").unwrap();
        assert_eq!(after.logs.len(), before.logs.len());
        assert_eq!(after.last_step_update, before.last_step_update);
    }

    #[test]
    fn test_done_removes_workdir() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        let task = reg.insert(video("a"), BTreeSet::new()).unwrap();
        std::fs::write(task.working_directory.join("out.mp4"), b"x").unwrap();

        reg.update_step("a", TaskStep::Done).unwrap();

        assert!(!task.working_directory.exists());
    }

    #[tokio::test]
    async fn test_async_step_update_cleans_up_off_thread() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        let done = reg.insert(video("done"), BTreeSet::new()).unwrap();
        let errored = reg.insert(video("errored"), BTreeSet::new()).unwrap();
        std::fs::create_dir(done.working_directory.join("fragments")).unwrap();
        std::fs::write(done.working_directory.join("fragments/f1.ts"), b"x").unwrap();
        std::fs::write(errored.working_directory.join("frag.ts"), b"x").unwrap();

        reg.update_step_async("done", TaskStep::Done).await.unwrap();
        reg.update_step_async("errored", TaskStep::Errored).await.unwrap();

        assert!(!done.working_directory.exists());
        assert!(errored.working_directory.exists());
        assert_eq!(reg.get("done").unwrap().step, TaskStep::Done);
        assert!(
            reg.update_step_async("missing", TaskStep::Done)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_errored_keeps_non_empty_workdir() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        let full = reg.insert(video("full"), BTreeSet::new()).unwrap();
        let empty = reg.insert(video("empty"), BTreeSet::new()).unwrap();
        std::fs::write(full.working_directory.join("frag.ts"), b"x").unwrap();

        reg.update_step("full", TaskStep::Errored).unwrap();
        reg.update_step("empty", TaskStep::Errored).unwrap();

        assert!(full.working_directory.exists());
        assert!(!empty.working_directory.exists());
    }

    #[test]
    fn test_errored_always_policy_removes_workdir() {
        let root = tempfile::tempdir().unwrap();
        let reg = TaskRegistry::new(root.path(), ErrorCleanupPolicy::Always);
        let task = reg.insert(video("a"), BTreeSet::new()).unwrap();
        std::fs::write(task.working_directory.join("frag.ts"), b"x").unwrap();

        reg.update_step("a", TaskStep::Errored).unwrap();

        assert!(!task.working_directory.exists());
    }

    #[test]
    fn test_terminal_step_is_sticky() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        reg.insert(video("a"), BTreeSet::new()).unwrap();

        reg.update_step("a", TaskStep::Cancelled).unwrap();
        reg.update_step("a", TaskStep::Errored).unwrap();

        assert_eq!(reg.get("a").unwrap().step, TaskStep::Cancelled);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());

        assert!(reg.get("nope").unwrap_err().is_not_found());
        assert!(reg.update_step("nope", TaskStep::Done).unwrap_err().is_not_found());
        assert!(reg.update_progress("nope", "x").unwrap_err().is_not_found());
        assert!(reg.log_event("nope", "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_log_event_keeps_step() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        reg.insert(video("a"), BTreeSet::new()).unwrap();

        reg.log_event("a", "starting recorder").unwrap();

        let task = reg.get("a").unwrap();
        assert_eq!(task.step, TaskStep::Idle);
        assert_eq!(task.logs.last().unwrap().message, "starting recorder");
    }

    #[test]
    fn test_list_all_preserves_insertion_order() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        for id in ["zz", "aa", "mm", "bb"] {
            reg.insert(video(id), BTreeSet::new()).unwrap();
        }

        let snapshot = reg.list_all();
        reg.update_step("aa", TaskStep::Recording).unwrap();

        let ids: Vec<_> = snapshot.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["zz", "aa", "mm", "bb"]);
        assert_eq!(snapshot[1].step, TaskStep::Idle);
    }

    #[test]
    fn test_claim_next_hands_out_each_task_once() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        reg.insert(video("a"), BTreeSet::new()).unwrap();
        reg.insert(video("b"), BTreeSet::new()).unwrap();

        assert_eq!(reg.claim_next(TaskStep::Idle).unwrap().id, "a");
        assert_eq!(reg.claim_next(TaskStep::Idle).unwrap().id, "b");
        assert!(reg.claim_next(TaskStep::Idle).is_none());

        reg.update_step("a", TaskStep::Muxed).unwrap();
        assert_eq!(reg.claim_next(TaskStep::Muxed).unwrap().id, "a");
    }

    #[test]
    fn test_clear_old_retires_terminal_tasks_only() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path());
        for id in ["done", "errored", "cancelled", "recording"] {
            reg.insert(video(id), BTreeSet::new()).unwrap();
        }
        reg.update_step("done", TaskStep::Done).unwrap();
        reg.update_step("errored", TaskStep::Errored).unwrap();
        reg.update_step("cancelled", TaskStep::Cancelled).unwrap();
        reg.update_step("recording", TaskStep::Recording).unwrap();

        assert_eq!(reg.clear_old(Duration::from_secs(3600)), 0);
        assert_eq!(reg.clear_old(Duration::ZERO), 3);

        let remaining: Vec<_> = reg.list_all().into_iter().map(|t| t.id).collect();
        assert_eq!(remaining, ["recording"]);
    }
}
