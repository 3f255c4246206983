//! In-process [`DocumentStore`] backed by a map of vectors.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use cryptfeed_shared::{CollectionName, ID_FIELD, Record, RecordId, Result};
use tokio::sync::Mutex;

use crate::DocumentStore;

/// Document store that keeps everything in memory.
///
/// Like the libSQL store it does not enforce identifier uniqueness itself,
/// so tests observe exactly what the ingestion layer wrote.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<CollectionName, Vec<Record>>>,
    insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records stored in `collection`, in insertion order.
    pub async fn records(&self, collection: &CollectionName) -> Vec<Record> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `insert_many` calls made so far, including empty ones.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn distinct(&self, collection: &CollectionName, field: &str) -> Result<HashSet<RecordId>> {
        let guard = self.collections.lock().await;
        let Some(records) = guard.get(collection) else {
            return Ok(HashSet::new());
        };
        let ids = records
            .iter()
            .filter_map(|r| {
                if field == ID_FIELD {
                    Some(r.id().clone())
                } else {
                    r.get(field).and_then(RecordId::from_value)
                }
            })
            .collect();
        Ok(ids)
    }

    async fn insert_many(&self, collection: &CollectionName, records: &[Record]) -> Result<usize> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if records.is_empty() {
            return Ok(0);
        }
        self.collections
            .lock()
            .await
            .entry(collection.clone())
            .or_default()
            .extend(records.iter().cloned());
        Ok(records.len())
    }

    async fn count(&self, collection: &CollectionName) -> Result<u64> {
        Ok(self
            .collections
            .lock()
            .await
            .get(collection)
            .map_or(0, |v| v.len() as u64))
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        Ok(self.collections.lock().await.keys().cloned().collect())
    }
}
