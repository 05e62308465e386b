//! Kind-keyed construction of pluggable backends.
//!
//! Each capability (scraper, recorder, uploader, notifier) has one
//! [`ModuleRegistry`] mapping a `kind` string from the configuration to a
//! factory. Collaborators are injected explicitly through [`ModuleContext`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::monitor::{FeedSource, RssConfig, RssFeedSource};
use crate::notification::{
    DiscordConfig, DiscordNotifier, Notifier, WebhookConfig, WebhookNotifier,
};
use crate::recorder::{Recorder, YtarchiveConfig, YtarchiveRecorder};
use crate::task::TaskRegistry;
use crate::uploader::{LocalConfig, LocalUploader, Uploader};
use crate::{Error, Result};

/// One configured backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Routing tags. Empty accepts every task.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Kind-specific settings.
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl ModuleConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            tags: BTreeSet::new(),
            config: empty_table(),
        }
    }

    /// Name used in logs: the configured name, else the kind.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    fn decode<C: DeserializeOwned>(&self) -> Result<C> {
        self.config.clone().try_into().map_err(|e| {
            Error::config(format!("invalid {} settings for '{}': {}", self.kind, self.label(), e))
        })
    }
}

/// Shared collaborators available to every factory.
#[derive(Clone)]
pub struct ModuleContext {
    pub registry: Arc<TaskRegistry>,
    pub http: reqwest::Client,
}

type Factory<T> = Box<dyn Fn(&ModuleConfig, &ModuleContext) -> Result<Arc<T>> + Send + Sync>;

pub struct ModuleRegistry<T: ?Sized> {
    capability: &'static str,
    factories: BTreeMap<&'static str, Factory<T>>,
}

impl<T: ?Sized> ModuleRegistry<T> {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            factories: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: &'static str, factory: F)
    where
        F: Fn(&ModuleConfig, &ModuleContext) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Fails with a configuration error for unregistered kinds.
    pub fn check_kind(&self, kind: &str) -> Result<()> {
        if self.contains(kind) {
            Ok(())
        } else {
            Err(Error::config(format!(
                "unknown {} kind: {}",
                self.capability, kind
            )))
        }
    }

    pub fn build(&self, config: &ModuleConfig, ctx: &ModuleContext) -> Result<Arc<T>> {
        self.check_kind(&config.kind)?;
        let factory = &self.factories[config.kind.as_str()];
        factory(config, ctx)
    }
}

impl ModuleRegistry<dyn FeedSource> {
    pub fn scrapers() -> Self {
        let mut registry = Self::new("scraper");
        registry.register("rss", |cfg, ctx| {
            let config: RssConfig = cfg.decode()?;
            Ok(Arc::new(RssFeedSource::new(config, ctx.http.clone())) as Arc<dyn FeedSource>)
        });
        registry
    }
}

impl ModuleRegistry<dyn Recorder> {
    pub fn recorders() -> Self {
        let mut registry = Self::new("recorder");
        registry.register("ytarchive", |cfg, ctx| {
            let config: YtarchiveConfig = cfg.decode()?;
            Ok(Arc::new(YtarchiveRecorder::new(config, ctx.registry.clone())) as Arc<dyn Recorder>)
        });
        registry
    }
}

impl ModuleRegistry<dyn Uploader> {
    pub fn uploaders() -> Self {
        let mut registry = Self::new("uploader");
        registry.register("local", |cfg, _ctx| {
            let config: LocalConfig = cfg.decode()?;
            Ok(Arc::new(LocalUploader::new(config)) as Arc<dyn Uploader>)
        });
        registry
    }
}

impl ModuleRegistry<dyn Notifier> {
    pub fn notifiers() -> Self {
        let mut registry = Self::new("notifier");
        registry.register("discord", |cfg, ctx| {
            let config: DiscordConfig = cfg.decode()?;
            Ok(Arc::new(DiscordNotifier::new(
                config,
                ctx.http.clone(),
                ctx.registry.clone(),
            )) as Arc<dyn Notifier>)
        });
        registry.register("webhook", |cfg, ctx| {
            let config: WebhookConfig = cfg.decode()?;
            Ok(Arc::new(WebhookNotifier::new(
                config,
                ctx.http.clone(),
                ctx.registry.clone(),
            )) as Arc<dyn Notifier>)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ErrorCleanupPolicy;

    fn context(root: &std::path::Path) -> ModuleContext {
        ModuleContext {
            registry: Arc::new(TaskRegistry::new(root, ErrorCleanupPolicy::IfEmpty)),
            http: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_unknown_kind_is_configuration_error() {
        let root = tempfile::tempdir().unwrap();
        let registry = ModuleRegistry::<dyn Uploader>::uploaders();

        let err = match registry.build(&ModuleConfig::new("s3"), &context(root.path())) {
            Err(err) => err,
            Ok(_) => panic!("s3 should not resolve"),
        };

        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(err.to_string(), "Configuration error: unknown uploader kind: s3");
    }

    #[test]
    fn test_builtin_kinds() {
        assert_eq!(ModuleRegistry::<dyn FeedSource>::scrapers().kinds(), vec!["rss"]);
        assert_eq!(ModuleRegistry::<dyn Recorder>::recorders().kinds(), vec!["ytarchive"]);
        assert_eq!(ModuleRegistry::<dyn Uploader>::uploaders().kinds(), vec!["local"]);
        assert_eq!(
            ModuleRegistry::<dyn Notifier>::notifiers().kinds(),
            vec!["discord", "webhook"]
        );
    }

    #[test]
    fn test_build_with_defaults() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());

        let source = ModuleRegistry::<dyn FeedSource>::scrapers()
            .build(&ModuleConfig::new("rss"), &ctx)
            .unwrap();
        let recorder = ModuleRegistry::<dyn Recorder>::recorders()
            .build(&ModuleConfig::new("ytarchive"), &ctx)
            .unwrap();

        assert_eq!(source.kind(), "rss");
        assert_eq!(recorder.kind(), "ytarchive");
    }

    #[test]
    fn test_missing_required_settings() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let mut config = ModuleConfig::new("local");
        config.name = Some("disk".to_string());

        let err = match ModuleRegistry::<dyn Uploader>::uploaders().build(&config, &ctx) {
            Err(err) => err,
            Ok(_) => panic!("local uploader requires a path"),
        };

        assert!(err.to_string().contains("invalid local settings for 'disk'"));
    }

    #[test]
    fn test_module_config_from_toml() {
        let config: ModuleConfig = toml::from_str(
            r#"
            kind = "webhook"
            tags = ["music"]
            [config]
            url = "https://example.com/hook"
            "#,
        )
        .unwrap();
        let root = tempfile::tempdir().unwrap();

        let notifier = ModuleRegistry::<dyn Notifier>::notifiers()
            .build(&config, &context(root.path()))
            .unwrap();

        assert_eq!(config.label(), "webhook");
        assert!(config.tags.contains("music"));
        assert_eq!(notifier.kind(), "webhook");
    }
}
