//! Generic webhook notifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::Notifier;
use crate::task::{Task, TaskRegistry};
use crate::uploader::UploadResult;
use crate::{Error, Result};

/// Webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            headers: Vec::new(),
            auth: None,
            timeout_secs: default_timeout(),
        }
    }
}

pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
    registry: Arc<TaskRegistry>,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig, client: Client, registry: Arc<TaskRegistry>) -> Self {
        Self {
            config,
            client,
            registry,
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let custom = self.config.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()));
        let auth = match &self.config.auth {
            Some(WebhookAuth::Header { name, value }) => Some((name.as_str(), value.clone())),
            Some(WebhookAuth::Bearer { token }) => Some(("authorization", format!("Bearer {}", token))),
            _ => None,
        };

        for (name, value) in custom.map(|(n, v)| (n, v.to_string())).chain(auth) {
            if let (Ok(name), Ok(value)) = (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, value);
            } else {
                warn!(header = %name, "Skipping invalid webhook header");
            }
        }

        headers
    }

    fn build_payload(&self, task: &Task, upload: &UploadResult) -> serde_json::Value {
        json!({
            "event_type": "video_uploaded",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "video_id": upload.video_id,
            "title": task.title,
            "channel_id": task.channel_id,
            "channel_name": task.channel_name,
            "public_url": upload.public_url,
            "tags": task.tags,
            "data": upload
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, upload: &UploadResult) -> Result<()> {
        let task = self.registry.get(&upload.video_id)?;
        let payload = self.build_payload(&task, upload);

        let mut request = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&self.config.url),
            _ => self.client.post(&self.config.url),
        };
        request = request
            .headers(self.build_headers())
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&payload);

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::Notification(format!(
                "Webhook failed: {} - {}",
                status, body
            )));
        }

        debug!(video_id = %upload.video_id, "Webhook notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::test_server::{CannedServer, response};
    use crate::task::{ErrorCleanupPolicy, Video};
    use std::collections::BTreeSet;

    fn insert_task(registry: &TaskRegistry, tags: BTreeSet<String>) -> Task {
        registry
            .insert(
                Video {
                    id: "vid".to_string(),
                    title: "Title".to_string(),
                    channel_id: "UC1".to_string(),
                    channel_name: "Channel".to_string(),
                },
                tags,
            )
            .unwrap()
    }

    fn upload() -> UploadResult {
        UploadResult {
            video_id: "vid".to_string(),
            public_url: "https://example.com/v.mp4".to_string(),
            title: "Title".to_string(),
            channel_id: "UC1".to_string(),
            channel_name: "Channel".to_string(),
        }
    }

    fn notifier(config: WebhookConfig) -> (tempfile::TempDir, Arc<TaskRegistry>, WebhookNotifier) {
        let root = tempfile::tempdir().unwrap();
        let registry = Arc::new(TaskRegistry::new(root.path(), ErrorCleanupPolicy::IfEmpty));
        let notifier = WebhookNotifier::new(config, Client::new(), registry.clone());
        (root, registry, notifier)
    }

    #[test]
    fn test_config_defaults_from_toml() {
        let config: WebhookConfig = toml::from_str(r#"url = "https://example.com/hook""#).unwrap();
        assert_eq!(config.method, "POST");
        assert_eq!(config.timeout_secs, 30);
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let (_root, _registry, notifier) = notifier(WebhookConfig {
            url: "https://example.com/webhook".to_string(),
            headers: vec![("X-Source".to_string(), "archiver".to_string())],
            auth: Some(WebhookAuth::Bearer {
                token: "test-token".to_string(),
            }),
            ..Default::default()
        });

        let headers = notifier.build_headers();

        assert_eq!(headers.get("authorization").unwrap(), "Bearer test-token");
        assert_eq!(headers.get("x-source").unwrap(), "archiver");
    }

    #[test]
    fn test_build_payload() {
        let (_root, registry, notifier) = notifier(WebhookConfig::default());
        let tags: BTreeSet<String> = ["music".to_string()].into();
        let task = insert_task(&registry, tags);

        let payload = notifier.build_payload(&task, &upload());

        assert_eq!(payload["event_type"], "video_uploaded");
        assert_eq!(payload["video_id"], "vid");
        assert_eq!(payload["public_url"], "https://example.com/v.mp4");
        assert_eq!(payload["tags"][0], "music");
        assert_eq!(payload["data"]["channel_id"], "UC1");
    }

    #[tokio::test]
    async fn test_success_status() {
        let server = CannedServer::start(vec![response("202 Accepted", "")]).await;
        let (_root, registry, notifier) = notifier(WebhookConfig {
            url: server.url.clone(),
            method: "put".to_string(),
            auth: Some(WebhookAuth::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            ..Default::default()
        });
        insert_task(&registry, BTreeSet::new());

        notifier.notify(&upload()).await.unwrap();

        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = CannedServer::start(vec![response("503 Service Unavailable", "")]).await;
        let (_root, registry, notifier) = notifier(WebhookConfig {
            url: server.url.clone(),
            ..Default::default()
        });
        insert_task(&registry, BTreeSet::new());

        let err = notifier.notify(&upload()).await.unwrap_err();

        assert!(matches!(err, Error::Notification(_)));
        assert!(err.to_string().contains("503"));
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);
        let (_root, registry, notifier) = notifier(WebhookConfig {
            url,
            ..Default::default()
        });
        insert_task(&registry, BTreeSet::new());

        let err = notifier.notify(&upload()).await.unwrap_err();

        assert!(matches!(err, Error::Notification(_)));
    }
}
