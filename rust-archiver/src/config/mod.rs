//! TOML configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::modules::{ModuleConfig, ModuleRegistry};
use crate::monitor::{ChannelFilter, DEDUP_TTL, FeedSource, PollerSettings, WatchedChannel};
use crate::notification::Notifier;
use crate::recorder::Recorder;
use crate::task::ErrorCleanupPolicy;
use crate::uploader::Uploader;
use crate::utils::fs;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub scraper: ScraperSection,
    #[serde(default = "default_recorder")]
    pub recorder: ModuleConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub uploaders: Vec<ModuleConfig>,
    #[serde(default)]
    pub notifiers: Vec<ModuleConfig>,
}

fn default_recorder() -> ModuleConfig {
    ModuleConfig::new("ytarchive")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    /// Root under which per-task working directories are created.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Enables daily-rolling file logs when set.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_task_retention")]
    pub task_retention_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default)]
    pub error_cleanup: ErrorCleanupPolicy,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Print the task table on the first interrupt.
    #[serde(default = "default_true")]
    pub status_table: bool,
}

fn default_working_directory() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_task_retention() -> u64 {
    7 * 24 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    60 * 60
}

fn default_bus_capacity() -> usize {
    32
}

fn default_true() -> bool {
    true
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            log_filter: None,
            log_dir: None,
            task_retention_secs: default_task_retention(),
            cleanup_interval_secs: default_cleanup_interval(),
            error_cleanup: ErrorCleanupPolicy::default(),
            bus_capacity: default_bus_capacity(),
            status_table: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperSection {
    #[serde(default = "default_scraper_kind")]
    pub kind: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    /// Added to every discovered task.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_scraper_kind() -> String {
    "rss".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    300
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl Default for ScraperSection {
    fn default() -> Self {
        Self {
            kind: default_scraper_kind(),
            poll_interval_secs: default_poll_interval(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            tags: BTreeSet::new(),
            config: empty_table(),
        }
    }
}

impl ScraperSection {
    pub fn module(&self) -> ModuleConfig {
        ModuleConfig {
            kind: self.kind.clone(),
            name: None,
            tags: self.tags.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub regex: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl AppConfig {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| fs::io_error("reading config file", path, e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::config("at least one channel is required"));
        }
        if self.scraper.poll_interval_secs == 0 {
            return Err(Error::config("scraper.poll_interval_secs must be positive"));
        }
        if self.scraper.backoff_base_secs == 0 {
            return Err(Error::config("scraper.backoff_base_secs must be positive"));
        }
        if self.scraper.backoff_base_secs > self.scraper.backoff_max_secs {
            return Err(Error::config(
                "scraper.backoff_base_secs must not exceed scraper.backoff_max_secs",
            ));
        }
        if self.app.bus_capacity == 0 {
            return Err(Error::config("app.bus_capacity must be positive"));
        }

        // Compiles every filter and rejects empty ids.
        self.watched_channels()?;

        ModuleRegistry::<dyn FeedSource>::scrapers().check_kind(&self.scraper.kind)?;
        ModuleRegistry::<dyn Recorder>::recorders().check_kind(&self.recorder.kind)?;
        let uploaders = ModuleRegistry::<dyn Uploader>::uploaders();
        for module in &self.uploaders {
            uploaders.check_kind(&module.kind)?;
        }
        let notifiers = ModuleRegistry::<dyn Notifier>::notifiers();
        for module in &self.notifiers {
            notifiers.check_kind(&module.kind)?;
        }

        Ok(())
    }

    /// Channels with compiled filters. Channel tags include the scraper tags.
    pub fn watched_channels(&self) -> Result<Vec<WatchedChannel>> {
        self.channels
            .iter()
            .map(|channel| {
                if channel.id.trim().is_empty() {
                    return Err(Error::config("channel id must not be empty"));
                }
                if channel.filters.is_empty() {
                    return Err(Error::config(format!(
                        "channel {} needs at least one filter",
                        channel.id
                    )));
                }

                let filters = channel
                    .filters
                    .iter()
                    .map(|filter| {
                        let regex = Regex::new(&filter.regex).map_err(|e| {
                            Error::config(format!(
                                "channel {}: invalid filter regex '{}': {}",
                                channel.id, filter.regex, e
                            ))
                        })?;
                        Ok(ChannelFilter {
                            regex,
                            tags: filter.tags.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                let name = if channel.name.is_empty() {
                    channel.id.clone()
                } else {
                    channel.name.clone()
                };

                Ok(WatchedChannel {
                    id: channel.id.clone(),
                    name,
                    tags: self.scraper.tags.union(&channel.tags).cloned().collect(),
                    filters,
                })
            })
            .collect()
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_interval: Duration::from_secs(self.scraper.poll_interval_secs),
            backoff_base: Duration::from_secs(self.scraper.backoff_base_secs),
            backoff_max: Duration::from_secs(self.scraper.backoff_max_secs),
            dedup_ttl: DEDUP_TTL,
        }
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.app.task_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.app.cleanup_interval_secs)
    }
}
