use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use matrix_bot_sdk::client::{MatrixAuth, MatrixClient};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::bridge::BridgeCore;
use crate::bridge::gateway::MatrixGateway;
use crate::config::{MatrixConfig, RelayConfig};
use crate::media::{MAX_MATRIX_FILE_SIZE, MediaHandler, MediaInfo};

pub mod sync;

use self::sync::SyncResponse;

/// Extra time on top of the server-side long-poll timeout before the request is abandoned.
const SYNC_GRACE: Duration = Duration::from_secs(30);

/// Initial sync only needs a `since` token; history is dropped by the bridge anyway.
const INITIAL_SYNC_FILTER: &str = r#"{"room":{"timeline":{"limit":1}}}"#;

/// Client-server API session of the relay's own Matrix account.
pub struct MatrixSession {
    client: MatrixClient,
    http: Client,
    media: MediaHandler,
    homeserver_url: String,
    access_token: SecretString,
    user_id: String,
}

impl MatrixSession {
    pub fn new(config: &MatrixConfig) -> Result<Self> {
        info!("initializing matrix session for {}", config.user_id);

        let homeserver = Url::parse(&config.homeserver_url)
            .with_context(|| format!("invalid homeserver url {}", config.homeserver_url))?;
        let auth = MatrixAuth::new(config.access_token.expose_secret());

        Ok(Self {
            client: MatrixClient::new(homeserver, auth),
            http: Client::new(),
            media: MediaHandler::new(&config.homeserver_url),
            homeserver_url: config.homeserver_url.trim_end_matches('/').to_string(),
            access_token: SecretString::new(config.access_token.expose_secret().into()),
            user_id: config.user_id.clone(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn sync_once(&self, since: Option<&str>, timeout_ms: u64) -> Result<SyncResponse> {
        let mut url = Url::parse(&format!("{}/_matrix/client/v3/sync", self.homeserver_url))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &timeout_ms.to_string());
            match since {
                Some(since) => query.append_pair("since", since),
                None => query.append_pair("filter", INITIAL_SYNC_FILTER),
            };
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .timeout(Duration::from_millis(timeout_ms) + SYNC_GRACE)
            .send()
            .await
            .context("sync request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("sync failed: {} - {}", status, body));
        }

        response
            .json::<SyncResponse>()
            .await
            .context("failed to parse sync response")
    }

    /// Long-polls `/sync` and feeds every room message to the bridge, one at a time.
    pub async fn run_sync_loop(&self, bridge: Arc<BridgeCore>, relay: &RelayConfig) -> Result<()> {
        let retry_delay = Duration::from_millis(relay.sync_retry_delay_ms);
        let mut since: Option<String> = None;

        info!("matrix sync loop started");
        loop {
            match self.sync_once(since.as_deref(), relay.sync_timeout_ms).await {
                Ok(response) => {
                    for (room_id, event) in response.room_messages() {
                        // Outcomes are logged and counted by the bridge.
                        let _ = bridge.on_matrix_sync_event(room_id, event).await;
                    }
                    debug!(next_batch = %response.next_batch, "sync batch processed");
                    since = Some(response.next_batch);
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "matrix sync failed, retrying");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl MatrixGateway for MatrixSession {
    async fn send_message(&self, room_id: &str, content: Value) -> Result<String> {
        let event_id = self
            .client
            .send_event(room_id, "m.room.message", &content)
            .await?;
        Ok(event_id)
    }

    async fn upload_from_url(&self, url: &str, content_type: &str, filename: &str) -> Result<String> {
        let mut media = self.media.download_from_url(url, MAX_MATRIX_FILE_SIZE).await?;
        media.content_type = content_type.to_string();
        media.filename = filename.to_string();
        self.media
            .upload_to_matrix(&media, self.access_token.expose_secret())
            .await
    }

    async fn download_media(&self, uri: &str, max_size: u64) -> Result<MediaInfo> {
        if uri.starts_with("mxc://") {
            self.media
                .download_matrix_media(uri, self.access_token.expose_secret(), max_size)
                .await
        } else {
            self.media.download_from_url(uri, max_size).await
        }
    }

    fn media_download_url(&self, uri: &str) -> String {
        self.media.download_url(uri)
    }
}
