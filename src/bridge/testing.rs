//! Recording fakes of both platforms for bridge tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

use super::BridgeCore;
use super::gateway::{DiscordGateway, MatrixGateway, WebhookPost};
use crate::config::{ChannelMap, RelayConfig};
use crate::media::{MediaHandler, MediaInfo, MediaTooLarge};
use crate::store::{CorrelationStore, IdentityCache, IdentityProvisioner, WebhookCredential};

pub const CHANNEL: &str = "42";
pub const ROOM: &str = "!room:example.org";
pub const START_MS: i64 = 1_700_000_000_000;
pub const BOT_USER_ID: &str = "100";
pub const RELAY_USER_ID: &str = "@relay:example.org";

#[derive(Default)]
pub struct FakeDiscord {
    provisioned: Mutex<Vec<(String, String)>>,
    executed: Mutex<Vec<(WebhookCredential, WebhookPost)>>,
    edited: Mutex<Vec<(WebhookCredential, String, String)>>,
    fail_sends: AtomicBool,
}

impl FakeDiscord {
    pub fn provisioned(&self) -> Vec<(String, String)> {
        self.provisioned.lock().clone()
    }

    pub fn executed(&self) -> Vec<(WebhookCredential, WebhookPost)> {
        self.executed.lock().clone()
    }

    pub fn edited(&self) -> Vec<(WebhookCredential, String, String)> {
        self.edited.lock().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityProvisioner for FakeDiscord {
    async fn provision(&self, channel_id: &str, display_name: &str) -> Result<WebhookCredential> {
        let mut provisioned = self.provisioned.lock();
        provisioned.push((channel_id.to_string(), display_name.to_string()));
        let n = provisioned.len();
        Ok(WebhookCredential {
            id: format!("W{n}"),
            token: format!("T{n}"),
        })
    }
}

#[async_trait]
impl DiscordGateway for FakeDiscord {
    async fn execute_webhook(&self, webhook: &WebhookCredential, post: WebhookPost) -> Result<String> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("discord unavailable"));
        }
        let mut executed = self.executed.lock();
        executed.push((webhook.clone(), post));
        Ok(format!("D{}", executed.len()))
    }

    async fn edit_webhook_message(
        &self,
        webhook: &WebhookCredential,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        self.edited
            .lock()
            .push((webhook.clone(), message_id.to_string(), content.to_string()));
        Ok(())
    }
}

pub struct FakeMatrix {
    media: MediaHandler,
    sent: Mutex<Vec<(String, Value)>>,
    uploads: Mutex<Vec<(String, String, String)>>,
    served: Mutex<HashMap<String, MediaInfo>>,
    downloads: AtomicUsize,
    fail_sends: AtomicBool,
    fail_uploads: AtomicBool,
}

impl FakeMatrix {
    fn new() -> Self {
        Self {
            media: MediaHandler::new("https://matrix.example.org"),
            sent: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            served: Mutex::new(HashMap::new()),
            downloads: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    pub fn uploads(&self) -> Vec<(String, String, String)> {
        self.uploads.lock().clone()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn serve_media(&self, uri: &str, data: &[u8], content_type: &str) {
        self.served.lock().insert(
            uri.to_string(),
            MediaInfo {
                data: data.to_vec(),
                content_type: content_type.to_string(),
                filename: "media".to_string(),
                size: data.len(),
            },
        );
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MatrixGateway for FakeMatrix {
    async fn send_message(&self, room_id: &str, content: Value) -> Result<String> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("homeserver unavailable"));
        }
        let mut sent = self.sent.lock();
        sent.push((room_id.to_string(), content));
        Ok(format!("$M{}", sent.len()))
    }

    async fn upload_from_url(&self, url: &str, content_type: &str, filename: &str) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("attachment fetch failed"));
        }
        let mut uploads = self.uploads.lock();
        uploads.push((url.to_string(), content_type.to_string(), filename.to_string()));
        Ok(format!("mxc://example.org/upload{}", uploads.len()))
    }

    async fn download_media(&self, uri: &str, max_size: u64) -> Result<MediaInfo> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let media = self
            .served
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {uri}"))?;
        if media.size as u64 > max_size {
            return Err(MediaTooLarge { limit: max_size }.into());
        }
        Ok(media)
    }

    fn media_download_url(&self, uri: &str) -> String {
        self.media.download_url(uri)
    }
}

pub struct Harness {
    pub bridge: BridgeCore,
    pub discord: Arc<FakeDiscord>,
    pub matrix: Arc<FakeMatrix>,
    _state: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_relay(RelayConfig::default())
    }

    pub fn with_relay(relay: RelayConfig) -> Self {
        let state = tempfile::tempdir().expect("temp dir");
        let identities =
            IdentityCache::open(state.path().join("webhooks.json")).expect("open identities");
        let correlations =
            CorrelationStore::open(state.path().join("messages.json")).expect("open messages");

        let mut bridge_map = BTreeMap::new();
        bridge_map.insert(CHANNEL.to_string(), ROOM.to_string());

        let discord = Arc::new(FakeDiscord::default());
        let matrix = Arc::new(FakeMatrix::new());
        let bridge = BridgeCore::new(
            ChannelMap::new(&bridge_map),
            Arc::new(identities),
            Arc::new(correlations),
            discord.clone(),
            matrix.clone(),
            RELAY_USER_ID,
            &relay,
        )
        .with_start_time(START_MS);

        Self {
            bridge,
            discord,
            matrix,
            _state: state,
        }
    }
}

/// A timeline event sent shortly after the harness start time.
pub fn matrix_event(event_id: &str, sender: &str, content: Value) -> Value {
    json!({
        "type": "m.room.message",
        "event_id": event_id,
        "sender": sender,
        "origin_server_ts": START_MS + 1_000,
        "content": content,
    })
}
