use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{Backoff, FeedItem, FeedSource, PollerSettings, WatchedChannel};
use crate::Error;
use crate::bus::{MessageBus, TOPIC_TASK_CREATED, TaskEvent};
use crate::dedup::DedupStore;
use crate::task::{TaskRegistry, Video};

/// Polls one channel until cancelled.
///
/// State is private to the loop: the id at the head of the last processed
/// feed and the consecutive-failure backoff.
pub struct ChannelPoller {
    channel: WatchedChannel,
    source: Arc<dyn FeedSource>,
    registry: Arc<TaskRegistry>,
    dedup: Arc<DedupStore<String, ()>>,
    bus: Arc<MessageBus<TaskEvent>>,
    settings: PollerSettings,
    backoff: Backoff,
    last_seen: Option<String>,
}

impl ChannelPoller {
    pub fn new(
        channel: WatchedChannel,
        source: Arc<dyn FeedSource>,
        registry: Arc<TaskRegistry>,
        dedup: Arc<DedupStore<String, ()>>,
        bus: Arc<MessageBus<TaskEvent>>,
        settings: PollerSettings,
    ) -> Self {
        let backoff = Backoff::new(settings.backoff_base, settings.backoff_max);
        Self {
            channel,
            source,
            registry,
            dedup,
            bus,
            settings,
            backoff,
            last_seen: None,
        }
    }

    pub fn channel(&self) -> &WatchedChannel {
        &self.channel
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(channel = %self.channel.name, "Poller started");

        loop {
            let Some(delay) = self.poll_once(&cancel).await else {
                break;
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(channel = %self.channel.name, "Poller stopped");
    }

    /// Run one fetch + process pass and return how long to sleep before the
    /// next one. `None` means the pass was cancelled.
    pub(crate) async fn poll_once(&mut self, cancel: &CancellationToken) -> Option<Duration> {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return None,
            r = self.source.fetch(&self.channel.id) => r,
        };

        match fetched {
            Ok(items) => {
                self.backoff.reset();
                if !self.process(items, cancel).await {
                    return None;
                }
                Some(self.settings.poll_interval)
            }
            Err(e) => {
                let delay = self.backoff.record_failure();
                warn!(
                    channel = %self.channel.name,
                    failures = self.backoff.failures(),
                    retry_in = ?delay,
                    error = %e,
                    "Failed to fetch channel feed"
                );
                Some(delay)
            }
        }
    }

    /// Returns false when cancelled mid-pass.
    async fn process(&mut self, items: Vec<FeedItem>, cancel: &CancellationToken) -> bool {
        let Some(head) = items.first().map(|i| i.id.clone()) else {
            return true;
        };
        if self.last_seen.as_deref() == Some(head.as_str()) {
            trace!(channel = %self.channel.name, "Feed unchanged");
            return true;
        }

        let mut complete = true;
        for item in items {
            if self.dedup.contains(&item.id) {
                continue;
            }
            let Some(filter) = self.channel.first_match(&item.title) else {
                trace!(video_id = %item.id, title = %item.title, "No filter matched");
                continue;
            };

            let tags: BTreeSet<String> = self.channel.tags.union(&filter.tags).cloned().collect();
            self.dedup
                .set(item.id.clone(), (), self.settings.dedup_ttl);

            let video = Video {
                id: item.id.clone(),
                title: item.title,
                channel_id: self.channel.id.clone(),
                channel_name: self.channel.name.clone(),
            };
            match self.registry.insert(video, tags) {
                Ok(task) => {
                    info!(
                        video_id = %task.id,
                        channel = %task.channel_name,
                        "Found new matching video: {}",
                        task.title
                    );
                    let event = TaskEvent { video_id: task.id };
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = self.bus.publish(TOPIC_TASK_CREATED, event) => {}
                    }
                }
                Err(Error::TaskAlreadyExists(id)) => {
                    debug!(video_id = %id, "Task already registered");
                }
                Err(e) => {
                    error!(video_id = %item.id, error = %e, "Failed to create task");
                    // Forget it so the next pass retries.
                    self.dedup.remove(&item.id);
                    complete = false;
                }
            }
        }

        if complete {
            self.last_seen = Some(head);
        }
        true
    }
}
