//! Service container.
//!
//! Owns the shared state (task registry, dedup store, message bus) and runs
//! three groups of work under one root [`CancellationToken`]:
//!
//! - the watcher with one poller per channel
//! - the recording dispatcher, which claims idle tasks whenever the bus
//!   announces a new one and runs record → upload → notify for each
//! - the housekeeping loop retiring old tasks and expired dedup entries

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{MessageBus, TOPIC_TASK_CREATED, TaskEvent};
use crate::config::AppConfig;
use crate::dedup::DedupStore;
use crate::modules::{ModuleContext, ModuleRegistry};
use crate::monitor::{FeedSource, PollerSettings, WatchedChannel, Watcher};
use crate::notification::Notifier;
use crate::pipeline::{Backend, Dispatcher};
use crate::recorder::Recorder;
use crate::task::{Task, TaskRegistry, TaskStep};
use crate::uploader::Uploader;
use crate::utils::{fs, http_client};
use crate::Result;

/// Upper bound for HTTP requests without their own timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the container runs, already constructed.
pub struct Components {
    pub registry: Arc<TaskRegistry>,
    pub source: Arc<dyn FeedSource>,
    pub recorder: Arc<dyn Recorder>,
    pub uploaders: Vec<Backend<dyn Uploader>>,
    pub notifiers: Vec<Backend<dyn Notifier>>,
    pub channels: Vec<WatchedChannel>,
    pub poller: PollerSettings,
    pub bus_capacity: usize,
    pub task_retention: Duration,
    pub cleanup_interval: Duration,
}

impl Components {
    /// Resolve every configured module through the built-in registries.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let working_root = &config.app.working_directory;
        fs::ensure_dir_all_sync_with_op("creating working directory", working_root)?;

        let registry = Arc::new(TaskRegistry::new(
            working_root.clone(),
            config.app.error_cleanup,
        ));
        let ctx = ModuleContext {
            registry: registry.clone(),
            http: http_client::build_client(HTTP_TIMEOUT)?,
        };

        let source = ModuleRegistry::<dyn FeedSource>::scrapers().build(&config.scraper.module(), &ctx)?;
        let recorder = ModuleRegistry::<dyn Recorder>::recorders().build(&config.recorder, &ctx)?;

        let uploader_modules = ModuleRegistry::<dyn Uploader>::uploaders();
        let uploaders = config
            .uploaders
            .iter()
            .map(|m| {
                let inner = uploader_modules.build(m, &ctx)?;
                Ok(Backend::new(m.label(), m.tags.clone(), inner))
            })
            .collect::<Result<Vec<_>>>()?;

        let notifier_modules = ModuleRegistry::<dyn Notifier>::notifiers();
        let notifiers = config
            .notifiers
            .iter()
            .map(|m| {
                let inner = notifier_modules.build(m, &ctx)?;
                Ok(Backend::new(m.label(), m.tags.clone(), inner))
            })
            .collect::<Result<Vec<_>>>()?;

        if uploaders.is_empty() {
            warn!("No uploaders configured, recorded tasks will end as errored");
        }

        Ok(Self {
            registry,
            source,
            recorder,
            uploaders,
            notifiers,
            channels: config.watched_channels()?,
            poller: config.poller_settings(),
            bus_capacity: config.app.bus_capacity,
            task_retention: config.task_retention(),
            cleanup_interval: config.cleanup_interval(),
        })
    }
}

pub struct ServiceContainer {
    registry: Arc<TaskRegistry>,
    dedup: Arc<DedupStore<String, ()>>,
    bus: Arc<MessageBus<TaskEvent>>,
    recorder: Arc<dyn Recorder>,
    dispatcher: Arc<Dispatcher>,
    watcher: Watcher,
    task_retention: Duration,
    cleanup_interval: Duration,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
}

impl ServiceContainer {
    pub fn new(components: Components) -> Self {
        let Components {
            registry,
            source,
            recorder,
            uploaders,
            notifiers,
            channels,
            poller,
            bus_capacity,
            task_retention,
            cleanup_interval,
        } = components;

        let dedup = Arc::new(DedupStore::new());
        let bus = Arc::new(MessageBus::new(bus_capacity));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), uploaders, notifiers));
        let watcher = Watcher::new(
            channels,
            source,
            registry.clone(),
            dedup.clone(),
            bus.clone(),
            poller,
        );

        Self {
            registry,
            dedup,
            bus,
            recorder,
            dispatcher,
            watcher,
            task_retention,
            cleanup_interval,
            cancellation_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(Components::from_config(config)?))
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    pub fn dedup(&self) -> Arc<DedupStore<String, ()>> {
        self.dedup.clone()
    }

    pub fn recorder(&self) -> Arc<dyn Recorder> {
        self.recorder.clone()
    }

    /// Cancelling this token starts a graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Run until the cancellation token fires and everything has drained.
    pub async fn run(self) {
        let cancel = self.cancellation_token.clone();

        // Subscribe before the pollers start so no announcement is missed.
        let events = self.bus.subscribe(&[TOPIC_TASK_CREATED]);

        info!(channels = self.watcher.channel_count(), "Starting services");
        let watcher = tokio::spawn(self.watcher.run(cancel.child_token()));
        let housekeeping = tokio::spawn(housekeeping(
            self.registry.clone(),
            self.dedup.clone(),
            self.task_retention,
            self.cleanup_interval,
            cancel.child_token(),
        ));

        let dispatch = RecordingDispatch {
            registry: self.registry.clone(),
            recorder: self.recorder.clone(),
            dispatcher: self.dispatcher.clone(),
            tracker: self.tracker.clone(),
        };
        dispatch.run(events, cancel).await;

        info!("Waiting for all tasks to finish...");
        self.tracker.close();
        self.tracker.wait().await;

        if let Err(e) = watcher.await {
            error!("Watcher task failed: {}", e);
        }
        if let Err(e) = housekeeping.await {
            error!("Housekeeping task failed: {}", e);
        }
        info!("Services shut down");
    }
}

struct RecordingDispatch {
    registry: Arc<TaskRegistry>,
    recorder: Arc<dyn Recorder>,
    dispatcher: Arc<Dispatcher>,
    tracker: TaskTracker,
}

impl RecordingDispatch {
    async fn run(&self, mut events: mpsc::Receiver<TaskEvent>, cancel: CancellationToken) {
        self.start_pending(&cancel);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Recording dispatcher shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            trace!(video_id = %event.video_id, "Task announced");
                            self.start_pending(&cancel);
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Start every idle task nobody has claimed yet.
    fn start_pending(&self, cancel: &CancellationToken) {
        while let Some(task) = self.registry.claim_next(TaskStep::Idle) {
            self.tracker.spawn(process_task(
                task,
                self.recorder.clone(),
                self.dispatcher.clone(),
                cancel.child_token(),
            ));
        }
    }
}

async fn process_task(
    task: Task,
    recorder: Arc<dyn Recorder>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    let id = task.id.clone();
    info!(video_id = %id, title = %task.title, "Starting recording");

    let recording = match recorder.record(&task, cancel.clone()).await {
        Ok(recording) => recording,
        Err(e) => {
            report(&id, "Recording", &e);
            return;
        }
    };

    if let Err(e) = dispatcher.dispatch(&recording, &cancel).await {
        report(&id, "Pipeline", &e);
    }
}

fn report(id: &str, stage: &str, err: &crate::Error) {
    if err.is_not_found() {
        debug!(video_id = %id, "{} aborted, task disappeared", stage);
    } else if err.is_cancelled() {
        info!(video_id = %id, "{} cancelled", stage);
    } else {
        warn!(video_id = %id, error = %err, "{} failed", stage);
    }
}

async fn housekeeping(
    registry: Arc<TaskRegistry>,
    dedup: Arc<DedupStore<String, ()>>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let interval = interval.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Housekeeping shutting down");
                break;
            }
            _ = ticker.tick() => {
                let tasks = registry.clear_old(retention);
                let entries = dedup.purge_expired();
                if tasks > 0 || entries > 0 {
                    debug!(tasks, entries, "Housekeeping removed stale entries");
                }
            }
        }
    }
}
