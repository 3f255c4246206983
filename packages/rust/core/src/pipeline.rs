//! One ingestion run: every configured source → its collection.
//!
//! Sources are visited in order. A failing source, or a failing store call
//! for one collection, is recorded in the summary and the run moves on.
//! The run is not atomic: collections processed before a crash keep their
//! new records.

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use cryptfeed_feeds::Fetcher;
use cryptfeed_shared::{CollectionName, RunConfig};
use cryptfeed_storage::DocumentStore;

use crate::dedup::{Deduplicator, IngestError, IngestReport, bounded};

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// What happened to one collection during a run.
#[derive(Debug)]
pub enum CollectionOutcome {
    /// The source returned nothing; the store was not touched.
    Empty,
    /// The batch went through the deduplicator.
    Ingested(IngestReport),
    /// Fetching, reading, or writing failed.
    Failed(IngestError),
}

/// Per-collection line of a [`RunSummary`].
#[derive(Debug)]
pub struct CollectionReport {
    pub collection: CollectionName,
    pub source: String,
    pub outcome: CollectionOutcome,
    pub elapsed: Duration,
}

impl CollectionReport {
    /// Records written for this collection.
    pub fn inserted(&self) -> usize {
        match &self.outcome {
            CollectionOutcome::Ingested(report) => report.inserted,
            _ => 0,
        }
    }
}

/// Result of a whole run, one report per source in visiting order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<CollectionReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Total records written across all collections.
    pub fn inserted_total(&self) -> usize {
        self.reports.iter().map(CollectionReport::inserted).sum()
    }

    /// Every collection-level failure.
    pub fn failures(&self) -> impl Iterator<Item = &IngestError> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            CollectionOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// JSON form kept in the run history.
    pub fn to_json(&self) -> Value {
        let collections: Vec<Value> = self
            .reports
            .iter()
            .map(|r| {
                let mut entry = json!({
                    "collection": r.collection.as_str(),
                    "source": r.source,
                    "elapsed_ms": r.elapsed.as_millis() as u64,
                });
                match &r.outcome {
                    CollectionOutcome::Empty => {
                        entry["status"] = json!("empty");
                    }
                    CollectionOutcome::Ingested(report) => {
                        entry["status"] = json!("ok");
                        entry["candidates"] = json!(report.candidates);
                        entry["inserted"] = json!(report.inserted);
                        entry["already_stored"] = json!(report.already_stored);
                        entry["repeated_in_batch"] = json!(report.repeated_in_batch);
                    }
                    CollectionOutcome::Failed(e) => {
                        entry["status"] = json!("failed");
                        entry["error_kind"] = json!(e.kind());
                        entry["error"] = json!(e.to_string());
                    }
                }
                entry
            })
            .collect();

        json!({
            "inserted": self.inserted_total(),
            "failed": self.failures().count(),
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "collections": collections,
        })
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a source is fetched.
    fn collection_started(&self, collection: &CollectionName, current: usize, total: usize);
    /// Called once a collection has an outcome.
    fn collection_finished(&self, report: &CollectionReport);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn collection_started(&self, _collection: &CollectionName, _current: usize, _total: usize) {}
    fn collection_finished(&self, _report: &CollectionReport) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run every source once and ingest its batch into its collection.
///
/// Never fails as a whole; per-collection problems land in the summary.
#[instrument(skip_all, fields(sources = fetchers.len()))]
pub async fn run_ingestion<S: DocumentStore + ?Sized>(
    store: &S,
    fetchers: &[Box<dyn Fetcher>],
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> RunSummary {
    let start = Instant::now();
    let dedup = Deduplicator::new(store, config.store_timeout);
    let mut summary = RunSummary::default();

    info!("starting ingestion run");

    for (idx, fetcher) in fetchers.iter().enumerate() {
        let collection = fetcher.collection().clone();
        progress.collection_started(&collection, idx + 1, fetchers.len());

        let collection_start = Instant::now();
        let outcome = ingest_source(&dedup, fetcher.as_ref(), config.fetch_timeout).await;

        let report = CollectionReport {
            collection,
            source: fetcher.source_url().to_string(),
            outcome,
            elapsed: collection_start.elapsed(),
        };
        progress.collection_finished(&report);
        summary.reports.push(report);
    }

    summary.elapsed = start.elapsed();
    info!(
        inserted = summary.inserted_total(),
        failed = summary.failures().count(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "ingestion run complete"
    );
    progress.done(&summary);
    summary
}

#[instrument(skip_all, fields(collection = %fetcher.collection(), source = fetcher.name()))]
async fn ingest_source<S: DocumentStore + ?Sized>(
    dedup: &Deduplicator<'_, S>,
    fetcher: &dyn Fetcher,
    fetch_timeout: Duration,
) -> CollectionOutcome {
    let collection = fetcher.collection();

    let fetched = bounded(
        fetch_timeout,
        || format!("fetch of {}", fetcher.source_url()),
        fetcher.fetch(),
    )
    .await;

    let batch = match fetched {
        Ok(batch) => batch,
        Err(source) => {
            warn!(error = %source, "source fetch failed, skipping");
            return CollectionOutcome::Failed(IngestError::Fetch {
                collection: collection.clone(),
                source,
            });
        }
    };

    if batch.is_empty() {
        info!("no {collection} data found, nothing to upload");
        return CollectionOutcome::Empty;
    }

    match dedup.ingest(collection, batch).await {
        Ok(report) => CollectionOutcome::Ingested(report),
        Err(e) => {
            error!(error = %e, kind = e.kind(), "ingestion failed");
            CollectionOutcome::Failed(e)
        }
    }
}
