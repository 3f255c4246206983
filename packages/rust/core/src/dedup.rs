//! Idempotent ingestion: insert only records a collection has not seen.
//!
//! Novelty is decided by reading the distinct identifiers already stored and
//! filtering the candidate batch against them, then issuing one bulk insert.
//! There is a window between the read and the write, so two concurrent
//! writers to one collection can both insert the same identifier. Runs are
//! sequential batch jobs, which keeps that window closed in practice.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, instrument};

use cryptfeed_shared::{CollectionName, CryptfeedError, ID_FIELD, Record, RecordId};
use cryptfeed_storage::DocumentStore;

// ---------------------------------------------------------------------------
// Errors & results
// ---------------------------------------------------------------------------

/// Why one collection's ingestion did not complete.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The source could not produce a batch.
    #[error("fetch failed for {collection}: {source}")]
    Fetch {
        collection: CollectionName,
        source: CryptfeedError,
    },

    /// Existing identifiers could not be read, so novelty is unknown.
    #[error("could not read existing ids in {collection}: {source}")]
    DistinctQuery {
        collection: CollectionName,
        source: CryptfeedError,
    },

    /// The bulk insert failed. The records stay unseen and the next run retries them.
    #[error("insert of {attempted} records into {collection} failed: {source}")]
    Insert {
        collection: CollectionName,
        attempted: usize,
        source: CryptfeedError,
    },
}

impl IngestError {
    /// Short machine-friendly kind, for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::DistinctQuery { .. } => "distinct_query",
            Self::Insert { .. } => "insert",
        }
    }

    pub fn collection(&self) -> &CollectionName {
        match self {
            Self::Fetch { collection, .. }
            | Self::DistinctQuery { collection, .. }
            | Self::Insert { collection, .. } => collection,
        }
    }
}

/// Counts from one successful [`Deduplicator::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Records handed in.
    pub candidates: usize,
    /// Dropped because the collection already holds their identifier.
    pub already_stored: usize,
    /// Dropped because an earlier record in the same batch had their identifier.
    pub repeated_in_batch: usize,
    /// Records written.
    pub inserted: usize,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Outcome of filtering a batch against stored identifiers.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub fresh: Vec<Record>,
    pub already_stored: usize,
    pub repeated_in_batch: usize,
}

/// Keep records whose identifier is neither stored nor seen earlier in the batch.
/// The first occurrence of a repeated identifier wins; order is preserved.
pub(crate) fn select_new(existing: &HashSet<RecordId>, candidates: Vec<Record>) -> Selection {
    let mut seen: HashSet<RecordId> = HashSet::with_capacity(candidates.len());
    let mut selection = Selection::default();

    for record in candidates {
        if existing.contains(record.id()) {
            selection.already_stored += 1;
        } else if !seen.insert(record.id().clone()) {
            selection.repeated_in_batch += 1;
        } else {
            selection.fresh.push(record);
        }
    }

    selection
}

// ---------------------------------------------------------------------------
// Deduplicator
// ---------------------------------------------------------------------------

/// Inserts the novel subset of a batch into a collection.
pub struct Deduplicator<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    store_timeout: Duration,
}

impl<'a, S: DocumentStore + ?Sized> Deduplicator<'a, S> {
    pub fn new(store: &'a S, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Insert exactly the candidates whose identifier is not yet stored.
    ///
    /// An empty batch, or one with nothing new, performs no write.
    #[instrument(skip_all, fields(collection = %collection, candidates = candidates.len()))]
    pub async fn ingest(
        &self,
        collection: &CollectionName,
        candidates: Vec<Record>,
    ) -> Result<IngestReport, IngestError> {
        let total = candidates.len();
        if total == 0 {
            debug!("empty batch, nothing to do");
            return Ok(IngestReport::default());
        }

        let existing = bounded(
            self.store_timeout,
            || format!("distinct on {collection}"),
            self.store.distinct(collection, ID_FIELD),
        )
        .await
        .map_err(|source| IngestError::DistinctQuery {
            collection: collection.clone(),
            source,
        })?;

        let selection = select_new(&existing, candidates);
        let mut report = IngestReport {
            candidates: total,
            already_stored: selection.already_stored,
            repeated_in_batch: selection.repeated_in_batch,
            inserted: 0,
        };

        if selection.fresh.is_empty() {
            info!(
                already_stored = report.already_stored,
                "no new records to insert"
            );
            return Ok(report);
        }

        let attempted = selection.fresh.len();
        report.inserted = bounded(
            self.store_timeout,
            || format!("insert into {collection}"),
            self.store.insert_many(collection, &selection.fresh),
        )
        .await
        .map_err(|source| IngestError::Insert {
            collection: collection.clone(),
            attempted,
            source,
        })?;

        info!(
            inserted = report.inserted,
            already_stored = report.already_stored,
            repeated_in_batch = report.repeated_in_batch,
            "inserted new records"
        );
        Ok(report)
    }
}

/// Await `fut`, failing with [`CryptfeedError::Timeout`] once `limit` elapses.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: impl FnOnce() -> String,
    fut: F,
) -> cryptfeed_shared::Result<T>
where
    F: Future<Output = cryptfeed_shared::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CryptfeedError::timeout(operation(), limit.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cryptfeed_storage::MemoryStore;

    fn collection(name: &str) -> CollectionName {
        CollectionName::new(name).unwrap()
    }

    fn rec(id: i64, title: &str) -> Record {
        Record::new(id).with("title", title)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Store whose reads or writes can be made to fail or hang.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_distinct: bool,
        fail_insert: bool,
        hang: bool,
    }

    #[async_trait]
    impl DocumentStore for FaultyStore {
        async fn distinct(
            &self,
            collection: &CollectionName,
            field: &str,
        ) -> cryptfeed_shared::Result<HashSet<RecordId>> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail_distinct {
                return Err(CryptfeedError::Storage("connection refused".into()));
            }
            self.inner.distinct(collection, field).await
        }

        async fn insert_many(
            &self,
            collection: &CollectionName,
            records: &[Record],
        ) -> cryptfeed_shared::Result<usize> {
            if self.fail_insert {
                return Err(CryptfeedError::Storage("write conflict".into()));
            }
            self.inner.insert_many(collection, records).await
        }

        async fn count(&self, collection: &CollectionName) -> cryptfeed_shared::Result<u64> {
            self.inner.count(collection).await
        }

        async fn collections(&self) -> cryptfeed_shared::Result<Vec<CollectionName>> {
            self.inner.collections().await
        }
    }

    #[test]
    fn select_new_filters_stored_and_repeated() {
        let existing = HashSet::from([RecordId::from(1_i64)]);
        let selection = select_new(
            &existing,
            vec![rec(1, "old"), rec(2, "first"), rec(3, "x"), rec(2, "second")],
        );
        let ids: Vec<&str> = selection.fresh.iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(selection.fresh[0].get("title").unwrap(), "first");
        assert_eq!(selection.already_stored, 1);
        assert_eq!(selection.repeated_in_batch, 1);
    }

    #[tokio::test]
    async fn empty_collection_takes_whole_batch() {
        let store = MemoryStore::new();
        let news = collection("rekt_news");
        let report = Deduplicator::new(&store, TIMEOUT)
            .ingest(&news, vec![rec(1, "a"), rec(2, "b")])
            .await
            .expect("ingest");
        assert_eq!(report.inserted, 2);
        assert_eq!(store.count(&news).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stored_ids_are_skipped() {
        let store = MemoryStore::new();
        let news = collection("rekt_news");
        store.insert_many(&news, &[rec(1, "original")]).await.unwrap();

        let report = Deduplicator::new(&store, TIMEOUT)
            .ingest(&news, vec![rec(1, "changed"), rec(2, "b")])
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.already_stored, 1);

        let stored = store.records(&news).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].get("title").unwrap(), "original");
        assert_eq!(stored[1].id().as_str(), "2");
    }

    #[tokio::test]
    async fn repeated_ids_in_batch_store_once() {
        let store = MemoryStore::new();
        let news = collection("crypto_news");
        let report = Deduplicator::new(&store, TIMEOUT)
            .ingest(&news, vec![rec(5, "a"), rec(5, "b")])
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.repeated_in_batch, 1);
        assert_eq!(store.distinct(&news, ID_FIELD).await.unwrap().len(), 1);
        assert_eq!(store.count(&news).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let store = MemoryStore::new();
        let report = Deduplicator::new(&store, TIMEOUT)
            .ingest(&collection("crypto_news"), Vec::new())
            .await
            .unwrap();
        assert_eq!(report, IngestReport::default());
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn second_ingest_of_same_batch_inserts_nothing() {
        let store = MemoryStore::new();
        let news = collection("newscatcher_news");
        let dedup = Deduplicator::new(&store, TIMEOUT);
        let batch = vec![rec(10, "a"), rec(11, "b"), rec(12, "c")];

        let first = dedup.ingest(&news, batch.clone()).await.unwrap();
        let count_after_first = store.count(&news).await.unwrap();
        let second = dedup.ingest(&news, batch).await.unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_stored, 3);
        assert_eq!(store.count(&news).await.unwrap(), count_after_first);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn distinct_failure_is_reported_without_insert() {
        let store = FaultyStore {
            fail_distinct: true,
            ..FaultyStore::default()
        };
        let err = Deduplicator::new(&store, TIMEOUT)
            .ingest(&collection("rekt_news"), vec![rec(1, "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DistinctQuery { .. }));
        assert_eq!(err.kind(), "distinct_query");
        assert_eq!(store.inner.insert_calls(), 0);
    }

    #[tokio::test]
    async fn insert_failure_carries_attempted_count() {
        let store = FaultyStore {
            fail_insert: true,
            ..FaultyStore::default()
        };
        let err = Deduplicator::new(&store, TIMEOUT)
            .ingest(&collection("rekt_news"), vec![rec(1, "a"), rec(2, "b"), rec(2, "c")])
            .await
            .unwrap_err();
        match err {
            IngestError::Insert { attempted, .. } => assert_eq!(attempted, 2),
            other => panic!("expected insert error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_store_times_out_as_distinct_failure() {
        let store = FaultyStore {
            hang: true,
            ..FaultyStore::default()
        };
        let err = Deduplicator::new(&store, Duration::from_millis(50))
            .ingest(&collection("rekt_news"), vec![rec(1, "a")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::DistinctQuery {
                source: CryptfeedError::Timeout { .. },
                ..
            }
        ));
    }
}
