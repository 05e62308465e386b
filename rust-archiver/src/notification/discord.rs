//! Discord webhook notifier.
//!
//! Rate limits are handled the way Discord recommends: on a 429, wait for
//! `Retry-After` (or `X-RateLimit-Reset-After`) and retry a bounded number of
//! times.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::Notifier;
use crate::task::{Task, TaskRegistry};
use crate::uploader::UploadResult;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
    /// Optional username override for the webhook.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

pub struct DiscordNotifier {
    config: DiscordConfig,
    client: Client,
    registry: Arc<TaskRegistry>,
}

impl DiscordNotifier {
    pub fn new(config: DiscordConfig, client: Client, registry: Arc<TaskRegistry>) -> Self {
        Self {
            config,
            client,
            registry,
        }
    }

    fn build_payload(&self, task: &Task, upload: &UploadResult) -> serde_json::Value {
        let embed = json!({
            "title": "Video downloaded",
            "description": format!("[{}]({})", task.title, upload.public_url),
            "fields": [
                {
                    "name": "Source",
                    "value": format!("[{}](https://youtu.be/{})", upload.video_id, upload.video_id),
                    "inline": true
                },
                {
                    "name": "Channel",
                    "value": format!(
                        "[{}](https://www.youtube.com/channel/{})",
                        task.channel_name, task.channel_id
                    ),
                    "inline": true
                }
            ]
        });

        let mut payload = json!({
            "content": "",
            "embeds": [embed]
        });

        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.config.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&self.config.webhook_url)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::Notification(format!("Discord request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(&response);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    return Err(Error::Notification(format!(
                        "Discord rate limit exceeded after {} retries",
                        MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!("Discord webhook failed: {} - {}", status, body);
            return Err(Error::Notification(format!(
                "Discord returned status code {}",
                status.as_u16()
            )));
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| response.headers().get(*name))
        .find_map(|v| v.to_str().ok()?.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn kind(&self) -> &'static str {
        "discord"
    }

    async fn notify(&self, upload: &UploadResult) -> Result<()> {
        let task = self.registry.get(&upload.video_id)?;
        let payload = self.build_payload(&task, upload);
        self.send_with_retry(&payload).await?;
        debug!(video_id = %upload.video_id, "Discord notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::test_server::{CannedServer, response};
    use crate::task::{ErrorCleanupPolicy, Video};
    use std::collections::BTreeSet;
    use std::time::Instant;

    fn notifier(registry: Arc<TaskRegistry>, username: Option<&str>) -> DiscordNotifier {
        notifier_at(registry, "http://127.0.0.1:9/webhook", username)
    }

    fn notifier_at(registry: Arc<TaskRegistry>, url: &str, username: Option<&str>) -> DiscordNotifier {
        DiscordNotifier::new(
            DiscordConfig {
                webhook_url: url.to_string(),
                username: username.map(str::to_string),
                avatar_url: None,
            },
            Client::new(),
            registry,
        )
    }

    fn upload() -> UploadResult {
        UploadResult {
            video_id: "vid".to_string(),
            public_url: "https://example.com/v/out.mp4".to_string(),
            title: "Title".to_string(),
            channel_id: "UC1".to_string(),
            channel_name: "Channel".to_string(),
        }
    }

    fn registry_with_task() -> (tempfile::TempDir, Arc<TaskRegistry>, Task) {
        let root = tempfile::tempdir().unwrap();
        let registry = Arc::new(TaskRegistry::new(root.path(), ErrorCleanupPolicy::IfEmpty));
        let task = registry
            .insert(
                Video {
                    id: "vid".to_string(),
                    title: "Karaoke night".to_string(),
                    channel_id: "UC1".to_string(),
                    channel_name: "Channel".to_string(),
                },
                BTreeSet::new(),
            )
            .unwrap();
        (root, registry, task)
    }

    #[test]
    fn test_build_payload() {
        let (_root, registry, task) = registry_with_task();
        let notifier = notifier(registry, Some("archiver"));

        let payload = notifier.build_payload(&task, &upload());

        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Video downloaded");
        assert_eq!(embed["description"], "[Karaoke night](https://example.com/v/out.mp4)");
        assert_eq!(embed["fields"][0]["value"], "[vid](https://youtu.be/vid)");
        assert_eq!(
            embed["fields"][1]["value"],
            "[Channel](https://www.youtube.com/channel/UC1)"
        );
        assert_eq!(payload["username"], "archiver");
        assert!(payload.get("avatar_url").is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_is_error() {
        let root = tempfile::tempdir().unwrap();
        let registry = Arc::new(TaskRegistry::new(root.path(), ErrorCleanupPolicy::IfEmpty));

        let err = notifier(registry, None).notify(&upload()).await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let (_root, registry, _task) = registry_with_task();
        let server = CannedServer::start(vec![response("500 Internal Server Error", "")]).await;

        let err = notifier_at(registry, &server.url, None)
            .notify(&upload())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Notification(_)));
        assert_eq!(
            err.to_string(),
            "Notification error: Discord returned status code 500"
        );
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let (_root, registry, _task) = registry_with_task();
        let server = CannedServer::start(vec![
            response("429 Too Many Requests", "Retry-After: 0\r\n"),
            response("204 No Content", ""),
        ])
        .await;

        let started = Instant::now();
        notifier_at(registry, &server.url, None)
            .notify(&upload())
            .await
            .unwrap();

        assert_eq!(server.requests(), 2);
        // Retry-After was honoured instead of the one second fallback.
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up() {
        let (_root, registry, _task) = registry_with_task();
        let server = CannedServer::start(vec![response(
            "429 Too Many Requests",
            "X-RateLimit-Reset-After: 0.01\r\n",
        )])
        .await;

        let err = notifier_at(registry, &server.url, None)
            .notify(&upload())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Notification(_)));
        assert_eq!(server.requests(), MAX_RATE_LIMIT_RETRIES as usize);
    }
}
