//! Discord webhooks that impersonate Matrix senders, one per channel and sender.

use std::collections::{BTreeMap, HashMap};
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::StoreError;
use super::file::{load_json, write_json_atomic};
use crate::web::metrics::Metrics;

const KEY_SEPARATOR: &str = " | ";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookCredential {
    pub id: String,
    pub token: String,
}

impl fmt::Debug for WebhookCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookCredential")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub channel_id: String,
    pub sender: String,
}

impl IdentityKey {
    pub fn new(channel_id: &str, sender: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            sender: sender.to_string(),
        }
    }

    fn storage_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.channel_id, self.sender)
    }

    fn from_storage_key(key: &str) -> Option<Self> {
        let (channel_id, sender) = key.split_once(KEY_SEPARATOR)?;
        if channel_id.is_empty() || sender.is_empty() {
            return None;
        }
        Some(Self::new(channel_id, sender))
    }
}

/// Creates a new impersonation identity on the destination platform.
#[async_trait]
pub trait IdentityProvisioner: Send + Sync {
    async fn provision(&self, channel_id: &str, display_name: &str) -> Result<WebhookCredential>;
}

pub struct IdentityCache {
    path: PathBuf,
    entries: RwLock<HashMap<IdentityKey, WebhookCredential>>,
}

impl IdentityCache {
    /// Loads the cache from `path`. A missing file is an empty cache; a corrupt one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let stored: BTreeMap<String, WebhookCredential> = load_json(&path)?;

        let mut entries = HashMap::with_capacity(stored.len());
        for (key, credential) in stored {
            match IdentityKey::from_storage_key(&key) {
                Some(identity) => {
                    entries.insert(identity, credential);
                }
                None => warn!(key = %key, "skipping identity entry with malformed key"),
            }
        }

        info!(path = %path.display(), identities = entries.len(), "identity cache loaded");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn get(&self, channel_id: &str, sender: &str) -> Option<WebhookCredential> {
        self.entries
            .read()
            .get(&IdentityKey::new(channel_id, sender))
            .cloned()
    }

    /// Returns the credential for the pair, provisioning and persisting one on first use.
    ///
    /// Provisioning runs outside the lock, so concurrent first uses of one pair may each
    /// create a remote identity. Only the first stored credential is kept and returned to
    /// every caller; the others are orphaned on the remote side.
    pub async fn resolve<P>(
        &self,
        channel_id: &str,
        sender: &str,
        display_name: &str,
        provisioner: &P,
    ) -> Result<WebhookCredential>
    where
        P: IdentityProvisioner + ?Sized,
    {
        if let Some(credential) = self.get(channel_id, sender) {
            Metrics::identity_cache_hit();
            return Ok(credential);
        }

        debug!(channel_id, sender, "provisioning impersonation identity");
        let created = provisioner.provision(channel_id, display_name).await?;
        Ok(self.store_created(IdentityKey::new(channel_id, sender), created))
    }

    fn store_created(&self, key: IdentityKey, created: WebhookCredential) -> WebhookCredential {
        let mut entries = self.entries.write();
        let credential = match entries.entry(key) {
            Entry::Occupied(existing) => {
                warn!(
                    channel_id = %existing.key().channel_id,
                    sender = %existing.key().sender,
                    orphaned_webhook_id = %created.id,
                    "identity was provisioned concurrently, keeping the first one"
                );
                return existing.get().clone();
            }
            Entry::Vacant(slot) => slot.insert(created).clone(),
        };

        Metrics::identity_created();
        // Lookups may run during the write; other writers still wait for it.
        let entries = RwLockWriteGuard::downgrade(entries);
        if let Err(err) = self.persist(&entries) {
            Metrics::persistence_failure();
            warn!(error = %err, path = %self.path.display(), "failed to persist identity cache");
        }
        credential
    }

    /// Whether `account_id` is the id of a webhook this cache created.
    pub fn is_owned_identity(&self, account_id: &str) -> bool {
        self.entries
            .read()
            .values()
            .any(|credential| credential.id == account_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn persist(&self, entries: &HashMap<IdentityKey, WebhookCredential>) -> Result<(), StoreError> {
        let stored: BTreeMap<String, &WebhookCredential> = entries
            .iter()
            .map(|(key, credential)| (key.storage_key(), credential))
            .collect();
        write_json_atomic(&self.path, &stored)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use futures::future::join_all;

    use super::{IdentityCache, IdentityKey, IdentityProvisioner, WebhookCredential};
    use crate::store::StoreError;

    #[derive(Default)]
    struct CountingProvisioner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvisioner for CountingProvisioner {
        async fn provision(&self, channel_id: &str, _display_name: &str) -> Result<WebhookCredential> {
            tokio::task::yield_now().await;
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(WebhookCredential {
                id: format!("{channel_id}-W{n}"),
                token: format!("T{n}"),
            })
        }
    }

    struct FailingProvisioner;

    #[async_trait]
    impl IdentityProvisioner for FailingProvisioner {
        async fn provision(&self, _channel_id: &str, _display_name: &str) -> Result<WebhookCredential> {
            Err(anyhow!("missing MANAGE_WEBHOOKS"))
        }
    }

    #[tokio::test]
    async fn resolve_provisions_once_and_then_hits_the_cache() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = IdentityCache::open(dir.path().join("webhooks.json")).expect("open cache");
        let provisioner = CountingProvisioner::default();

        let first = cache
            .resolve("C", "@alice:example.org", "alice", &provisioner)
            .await
            .expect("first resolve");
        let second = cache
            .resolve("C", "@alice:example.org", "alice", &provisioner)
            .await
            .expect("second resolve");

        assert_eq!(first, second);
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_channels_get_distinct_identities() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = IdentityCache::open(dir.path().join("webhooks.json")).expect("open cache");
        let provisioner = CountingProvisioner::default();

        let in_c = cache.resolve("C", "@alice:example.org", "alice", &provisioner).await.expect("C");
        let in_d = cache.resolve("D", "@alice:example.org", "alice", &provisioner).await.expect("D");

        assert_ne!(in_c, in_d);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_resolves_converge_on_one_persisted_identity() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("webhooks.json");
        let cache = IdentityCache::open(&path).expect("open cache");
        let provisioner = CountingProvisioner::default();

        let results = join_all(
            (0..8).map(|_| cache.resolve("C", "@alice:example.org", "alice", &provisioner)),
        )
        .await;

        let credentials: Vec<WebhookCredential> =
            results.into_iter().map(|r| r.expect("resolve")).collect();
        assert!(credentials.iter().all(|c| c == &credentials[0]));
        assert_eq!(cache.len(), 1);

        let reloaded = IdentityCache::open(&path).expect("reload cache");
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("C", "@alice:example.org"), Some(credentials[0].clone()));
    }

    #[tokio::test]
    async fn persisted_identities_survive_a_reload() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("webhooks.json");
        let provisioner = CountingProvisioner::default();

        let mut created = Vec::new();
        {
            let cache = IdentityCache::open(&path).expect("open cache");
            for i in 0..5 {
                let sender = format!("@user{i}:example.org");
                let credential = cache
                    .resolve("C", &sender, "user", &provisioner)
                    .await
                    .expect("resolve");
                created.push((sender, credential));
            }
        }

        let reloaded = IdentityCache::open(&path).expect("reload cache");
        assert_eq!(reloaded.len(), 5);
        for (sender, credential) in created {
            assert_eq!(reloaded.get("C", &sender), Some(credential));
        }
    }

    #[tokio::test]
    async fn provisioning_failure_leaves_the_cache_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("webhooks.json");
        let cache = IdentityCache::open(&path).expect("open cache");

        let err = cache
            .resolve("C", "@alice:example.org", "alice", &FailingProvisioner)
            .await
            .expect_err("provisioning fails");

        assert!(err.to_string().contains("MANAGE_WEBHOOKS"));
        assert_eq!(cache.len(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn owned_identities_are_recognised_by_webhook_id() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = IdentityCache::open(dir.path().join("webhooks.json")).expect("open cache");
        let provisioner = CountingProvisioner::default();

        let credential = cache
            .resolve("C", "@alice:example.org", "alice", &provisioner)
            .await
            .expect("resolve");

        assert!(cache.is_owned_identity(&credential.id));
        assert!(!cache.is_owned_identity("1234567890"));
        assert!(!cache.is_owned_identity(&credential.token));
    }

    #[cfg(unix)]
    #[test]
    fn lookups_proceed_while_the_state_file_is_being_written() {
        use std::sync::mpsc;
        use std::time::Duration;

        use crate::store::file::StalledWrite;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("webhooks.json");
        let cache = IdentityCache::open(&path).expect("open cache");
        let stalled = StalledWrite::install(&path);
        let credential = WebhookCredential {
            id: "900".to_string(),
            token: "T900".to_string(),
        };

        std::thread::scope(|scope| {
            let cache = &cache;
            let writer = scope.spawn(|| {
                cache.store_created(IdentityKey::new("C", "@alice:example.org"), credential.clone())
            });
            let (seen_tx, seen_rx) = mpsc::channel();
            scope.spawn(move || {
                while !cache.is_owned_identity("900") {
                    std::thread::yield_now();
                }
                let _ = seen_tx.send(());
            });

            let seen = seen_rx.recv_timeout(Duration::from_secs(5));
            stalled.drain();

            assert!(seen.is_ok(), "lookup waited for the state file write");
            assert_eq!(writer.join().expect("writer thread"), credential);
        });
    }

    #[test]
    fn reads_the_pipe_separated_file_format() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("webhooks.json");
        std::fs::write(
            &path,
            r#"{"42 | @bob:example.org": {"id": "900", "token": "secret"}, "garbage": {"id": "1", "token": "x"}}"#,
        )
        .expect("write fixture");

        let cache = IdentityCache::open(&path).expect("open cache");

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("42", "@bob:example.org").map(|c| c.id),
            Some("900".to_string())
        );
        assert!(cache.is_owned_identity("900"));
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("webhooks.json");
        std::fs::write(&path, "[1, 2").expect("write fixture");

        let err = IdentityCache::open(&path).err().expect("corrupt cache");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn storage_keys_round_trip() {
        let key = IdentityKey::new("42", "@alice:example.org");
        assert_eq!(key.storage_key(), "42 | @alice:example.org");
        assert_eq!(IdentityKey::from_storage_key(&key.storage_key()), Some(key));
        assert_eq!(IdentityKey::from_storage_key("no separator"), None);
    }

    #[test]
    fn debug_output_hides_the_token() {
        let credential = WebhookCredential {
            id: "1".to_string(),
            token: "very-secret".to_string(),
        };
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
