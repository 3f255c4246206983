//! Deduplicating ingestion for cryptfeed.
//!
//! [`dedup`] decides which records of a batch are new to a collection and
//! writes only those. [`pipeline`] runs every configured source through it
//! and collects a per-collection summary.

pub mod dedup;
pub mod pipeline;

pub use dedup::{Deduplicator, IngestError, IngestReport};
pub use pipeline::{
    CollectionOutcome, CollectionReport, ProgressReporter, RunSummary, SilentProgress,
    run_ingestion,
};
