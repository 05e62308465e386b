use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{ChannelPoller, FeedSource, PollerSettings, WatchedChannel};
use crate::bus::{MessageBus, TaskEvent};
use crate::dedup::DedupStore;
use crate::task::TaskRegistry;

/// Runs one [`ChannelPoller`] per channel under a single cancellation scope.
pub struct Watcher {
    pollers: Vec<ChannelPoller>,
}

impl Watcher {
    pub fn new(
        channels: Vec<WatchedChannel>,
        source: Arc<dyn FeedSource>,
        registry: Arc<TaskRegistry>,
        dedup: Arc<DedupStore<String, ()>>,
        bus: Arc<MessageBus<TaskEvent>>,
        settings: PollerSettings,
    ) -> Self {
        let pollers = channels
            .into_iter()
            .map(|channel| {
                ChannelPoller::new(
                    channel,
                    source.clone(),
                    registry.clone(),
                    dedup.clone(),
                    bus.clone(),
                    settings.clone(),
                )
            })
            .collect();
        Self { pollers }
    }

    pub fn channel_count(&self) -> usize {
        self.pollers.len()
    }

    /// Returns once every poller has stopped.
    pub async fn run(self, cancel: CancellationToken) {
        let mut set = JoinSet::new();
        let count = self.pollers.len();

        for poller in self.pollers {
            set.spawn(poller.run(cancel.child_token()));
        }
        info!("Watching {} channels", count);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Channel poller panicked");
            }
        }
        info!("All channel pollers stopped");
    }
}
