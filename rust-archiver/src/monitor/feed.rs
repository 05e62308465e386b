//! Channel feed sources.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// One entry of a channel feed. Feeds list the most recent entry first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
}

/// Fetches the current item list of a channel.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn fetch(&self, channel_id: &str) -> Result<Vec<FeedItem>>;
}

/// Configuration for [`RssFeedSource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    /// URL template; `{channel_id}` is substituted.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_feed_url() -> String {
    "https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Reads a channel's Atom feed over HTTP.
pub struct RssFeedSource {
    config: RssConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(rename = "videoId", alias = "yt:videoId")]
    video_id: String,
    title: String,
}

impl RssFeedSource {
    pub fn new(config: RssConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn feed_url(&self, channel_id: &str) -> String {
        self.config
            .feed_url
            .replace("{channel_id}", &urlencoding::encode(channel_id))
    }
}

/// Parse an Atom feed body into items, preserving feed order.
pub fn parse_feed(body: &str) -> Result<Vec<FeedItem>> {
    let feed: AtomFeed =
        quick_xml::de::from_str(body).map_err(|e| Error::FeedParse(e.to_string()))?;
    Ok(feed
        .entries
        .into_iter()
        .map(|e| FeedItem {
            id: e.video_id,
            title: e.title,
        })
        .collect())
}

#[async_trait]
impl FeedSource for RssFeedSource {
    fn kind(&self) -> &'static str {
        "rss"
    }

    async fn fetch(&self, channel_id: &str) -> Result<Vec<FeedItem>> {
        let url = self.feed_url(channel_id);
        debug!(channel_id, %url, "Fetching feed");

        let body = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_feed(&body)
    }
}
