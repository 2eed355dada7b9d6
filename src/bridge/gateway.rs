use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::media::MediaInfo;
use crate::store::{IdentityProvisioner, WebhookCredential};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// One webhook execution: text, a file, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPost {
    pub username: String,
    pub content: Option<String>,
    pub file: Option<OutboundFile>,
}

impl WebhookPost {
    pub fn text(username: &str, content: String) -> Self {
        Self {
            username: username.to_string(),
            content: Some(content),
            file: None,
        }
    }

    pub fn file(username: &str, file: OutboundFile) -> Self {
        Self {
            username: username.to_string(),
            content: None,
            file: Some(file),
        }
    }
}

#[async_trait]
pub trait DiscordGateway: IdentityProvisioner {
    /// Posts through the webhook and returns the new Discord message id.
    async fn execute_webhook(&self, webhook: &WebhookCredential, post: WebhookPost) -> Result<String>;

    async fn edit_webhook_message(
        &self,
        webhook: &WebhookCredential,
        message_id: &str,
        content: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait MatrixGateway: Send + Sync {
    /// Sends an `m.room.message` event and returns its event id.
    async fn send_message(&self, room_id: &str, content: Value) -> Result<String>;

    /// Fetches `url` and uploads it to the media repository, returning the `mxc://` uri.
    async fn upload_from_url(&self, url: &str, content_type: &str, filename: &str) -> Result<String>;

    /// Downloads an `mxc://` uri or a plain http(s) url.
    ///
    /// Bodies over `max_size` fail with [`MediaTooLarge`](crate::media::MediaTooLarge).
    async fn download_media(&self, uri: &str, max_size: u64) -> Result<MediaInfo>;

    /// A link to `uri` that Discord users can open.
    fn media_download_url(&self, uri: &str) -> String;
}
