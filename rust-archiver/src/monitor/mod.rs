//! Channel discovery: feed sources, per-channel pollers and the watcher that
//! supervises them.

mod backoff;
mod feed;
mod poller;
mod watcher;

use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;

pub use backoff::Backoff;
pub use feed::{FeedItem, FeedSource, RssConfig, RssFeedSource, parse_feed};
pub use poller::ChannelPoller;
pub use watcher::Watcher;

/// How long a discovered video id is remembered. Long enough to outlast any
/// realistic republish of the same entry.
pub const DEDUP_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A title filter. The first matching filter of a channel wins.
#[derive(Debug, Clone)]
pub struct ChannelFilter {
    pub regex: Regex,
    pub tags: BTreeSet<String>,
}

/// A channel with its compiled filters and routing tags.
#[derive(Debug, Clone)]
pub struct WatchedChannel {
    pub id: String,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub filters: Vec<ChannelFilter>,
}

impl WatchedChannel {
    pub fn first_match(&self, title: &str) -> Option<&ChannelFilter> {
        self.filters.iter().find(|f| f.regex.is_match(title))
    }
}

/// Timing knobs shared by every poller.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub dedup_ttl: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            dedup_ttl: DEDUP_TTL,
        }
    }
}
