//! Notification backends.
//!
//! - Discord webhooks
//! - Generic webhooks (HTTP POST/PUT with a JSON body)
//!
//! Both look the originating task up in the registry for display metadata;
//! a task that is no longer registered is an error.

mod discord;
mod webhook;

#[cfg(test)]
pub(crate) mod test_server;

pub use discord::{DiscordConfig, DiscordNotifier};
pub use webhook::{WebhookAuth, WebhookConfig, WebhookNotifier};

use async_trait::async_trait;

use crate::Result;
use crate::uploader::UploadResult;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Announce a finished upload.
    async fn notify(&self, upload: &UploadResult) -> Result<()>;
}
