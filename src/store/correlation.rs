use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::file::{load_json, write_json_atomic};
use super::{StoreError, WebhookCredential};
use crate::web::metrics::Metrics;

/// One relayed message, addressable by its id on either platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub origin_id: String,
    pub destination_id: String,
    /// Webhook that posted the destination message, when it was posted through one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookCredential>,
    pub origin_room: String,
    pub destination_room: String,
}

#[derive(Default)]
struct CorrelationIndex {
    by_origin: HashMap<String, CorrelationRecord>,
    by_destination: HashMap<String, String>,
}

impl CorrelationIndex {
    // Last write wins on either id; stale entries are dropped so both maps stay one-to-one.
    fn insert(&mut self, record: CorrelationRecord) {
        if let Some(previous) = self.by_origin.get(&record.origin_id) {
            if previous.destination_id != record.destination_id {
                let stale = previous.destination_id.clone();
                self.by_destination.remove(&stale);
            }
        }

        if let Some(previous_origin) = self.by_destination.get(&record.destination_id) {
            if *previous_origin != record.origin_id {
                let stale = previous_origin.clone();
                self.by_origin.remove(&stale);
            }
        }

        self.by_destination
            .insert(record.destination_id.clone(), record.origin_id.clone());
        self.by_origin.insert(record.origin_id.clone(), record);
    }
}

pub struct CorrelationStore {
    path: PathBuf,
    index: RwLock<CorrelationIndex>,
}

impl CorrelationStore {
    /// Loads the origin-keyed table from `path` and rebuilds the destination index from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let stored: BTreeMap<String, CorrelationRecord> = load_json(&path)?;

        let mut index = CorrelationIndex::default();
        for (_, record) in stored {
            index.insert(record);
        }

        info!(path = %path.display(), messages = index.by_origin.len(), "correlation store loaded");
        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    /// Stores `record` and rewrites the state file.
    ///
    /// The in-memory entry is kept even when the write fails; the error only reports that
    /// the record would not survive a restart.
    pub fn record(&self, record: CorrelationRecord) -> Result<(), StoreError> {
        let mut index = self.index.write();
        index.insert(record);
        Metrics::correlation_recorded();
        let index = RwLockWriteGuard::downgrade(index);
        write_json_atomic(&self.path, &index.by_origin)
    }

    pub fn by_origin(&self, origin_id: &str) -> Option<CorrelationRecord> {
        self.index.read().by_origin.get(origin_id).cloned()
    }

    pub fn by_destination(&self, destination_id: &str) -> Option<CorrelationRecord> {
        let index = self.index.read();
        let origin_id = index.by_destination.get(destination_id)?;
        index.by_origin.get(origin_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().by_origin.len()
    }
}
