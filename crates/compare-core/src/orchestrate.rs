//! Cross-store lookup orchestration.
//!
//! For each selected key the source and target documents are fetched
//! concurrently, diffed, and the outcome routed through a channel into the
//! single aggregator owner. Two independent budgets bound the pipeline:
//! `source_lookup_concurrency` for in-flight fetches and
//! `compare_concurrency` for diff computations. A failing key degrades to a
//! fetch-error outcome; it never aborts the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{DiffOutcome, RunAggregator};
use crate::diff::{diff, ExcludePolicy};
use crate::error::AdapterError;
use crate::value::{BusinessKey, DocumentValue};

/// Capability interface for enumerating and sampling business keys.
///
/// Implementations differ per store API; the engine depends only on this
/// trait, never on which store is behind it.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Best-effort population count for the collection.
    async fn estimate_size(&self, collection: &str) -> Result<u64, AdapterError>;

    /// A single consumable pass over the collection's business keys.
    ///
    /// The stream is finite and not restartable; keys missing the business
    /// key field are skipped by the adapter.
    async fn keys(
        &self,
        collection: &str,
        business_key: &str,
    ) -> Result<BoxStream<'static, Result<BusinessKey, AdapterError>>, AdapterError>;

    /// Server-side random sample of up to `size` keys, for fast mode.
    async fn sample_fast(
        &self,
        collection: &str,
        business_key: &str,
        size: u64,
    ) -> Result<Vec<BusinessKey>, AdapterError>;
}

/// Capability interface for point lookups by business key.
#[async_trait]
pub trait DocumentFetch: Send + Sync {
    /// Fetch the document matching `key`, or `None` when the store has no
    /// document for it. Retries for transient failures happen inside the
    /// adapter; an error returned here is final for this key.
    async fn fetch(
        &self,
        collection: &str,
        business_key: &str,
        key: &BusinessKey,
    ) -> Result<Option<DocumentValue>, AdapterError>;
}

/// The source and target documents (or absence markers) for one sampled key.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub key: BusinessKey,
    pub source: Option<DocumentValue>,
    pub target: Option<DocumentValue>,
}

/// Pipeline tuning for one collection run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source_lookup_concurrency: usize,
    pub compare_concurrency: usize,
    /// Emit a compare progress log line every this many outcomes; 0 disables.
    pub progress_log_every: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            source_lookup_concurrency: 8,
            compare_concurrency: 4,
            progress_log_every: 1000,
        }
    }
}

/// Fetch, diff and aggregate all selected keys for one collection.
///
/// Outcomes arrive at the aggregator in completion order, not input order;
/// each key produces exactly one outcome. Returns whether the run covered
/// every selected key; cancellation stops new fetches promptly, lets
/// in-flight work finish, and yields `false` so the summary can be flagged
/// incomplete.
pub async fn run_comparison(
    collection: String,
    business_key: String,
    keys: Vec<BusinessKey>,
    source: Arc<dyn DocumentFetch>,
    target: Arc<dyn DocumentFetch>,
    policy: Arc<ExcludePolicy>,
    options: RunOptions,
    cancel: CancellationToken,
    aggregator: &mut RunAggregator,
) -> bool {
    let total = keys.len() as u64;
    let (tx, mut rx) = mpsc::channel::<DiffOutcome>(options.source_lookup_concurrency.max(1) * 2);

    let producer = tokio::spawn(produce_outcomes(
        collection.clone(),
        business_key,
        keys,
        source,
        target,
        policy,
        options.clone(),
        cancel,
        tx,
    ));

    // Single mutation point: only this loop touches the aggregator.
    let started = Instant::now();
    let mut observed = 0u64;
    while let Some(outcome) = rx.recv().await {
        observed += 1;
        if options.progress_log_every > 0 && observed % options.progress_log_every == 0 {
            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            tracing::info!(
                collection = %collection,
                processed = observed,
                total,
                rate_docs_per_sec = format!("{:.1}", observed as f64 / elapsed),
                "compare progress"
            );
        }
        aggregator.observe(outcome);
    }

    match producer.await {
        Ok(covered_all) => covered_all,
        Err(e) => {
            tracing::error!(collection = %collection, error = %e, "lookup pipeline task failed");
            false
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn produce_outcomes(
    collection: String,
    business_key: String,
    keys: Vec<BusinessKey>,
    source: Arc<dyn DocumentFetch>,
    target: Arc<dyn DocumentFetch>,
    policy: Arc<ExcludePolicy>,
    options: RunOptions,
    cancel: CancellationToken,
    tx: mpsc::Sender<DiffOutcome>,
) -> bool {
    let total = keys.len() as u64;
    let issued = Arc::new(AtomicU64::new(0));

    let gate = cancel.clone();
    let key_stream = futures::stream::iter(keys).take_while(move |_| {
        let open = !gate.is_cancelled();
        async move { open }
    });

    let issued_counter = Arc::clone(&issued);
    let fetches = key_stream
        .map(move |key| {
            issued_counter.fetch_add(1, Ordering::Relaxed);
            let source = Arc::clone(&source);
            let target = Arc::clone(&target);
            let collection = collection.clone();
            let business_key = business_key.clone();
            async move {
                let (source_doc, target_doc) = tokio::join!(
                    source.fetch(&collection, &business_key, &key),
                    target.fetch(&collection, &business_key, &key),
                );
                match (source_doc, target_doc) {
                    (Ok(source), Ok(target)) => Ok(MatchedPair {
                        key,
                        source,
                        target,
                    }),
                    (Err(e), _) | (_, Err(e)) => Err((key, e)),
                }
            }
        })
        .buffer_unordered(options.source_lookup_concurrency.max(1));

    // Diffing is CPU-bound on large nested documents; spawning lets the
    // comparisons run on other worker threads, bounded separately from I/O.
    let outcomes = fetches
        .map(|fetched| {
            let policy = Arc::clone(&policy);
            tokio::spawn(async move {
                match fetched {
                    Ok(pair) => evaluate_pair(pair, &policy),
                    Err((key, error)) => Some(DiffOutcome::fetch_error(key, error)),
                }
            })
        })
        .buffer_unordered(options.compare_concurrency.max(1));

    tokio::pin!(outcomes);
    while let Some(joined) = outcomes.next().await {
        match joined {
            Ok(Some(outcome)) => {
                if tx.send(outcome).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "comparison task failed"),
        }
    }

    issued.load(Ordering::Relaxed) == total
}

/// Diff one matched pair into an outcome.
///
/// A pair with both sides absent cannot result from key selection; it is
/// logged as an internal defect and skipped rather than surfaced.
fn evaluate_pair(pair: MatchedPair, policy: &ExcludePolicy) -> Option<DiffOutcome> {
    if pair.source.is_none() && pair.target.is_none() {
        tracing::warn!(key = %pair.key, "matched pair with both sides absent; skipping");
        return None;
    }
    let differences = diff(pair.source.as_ref(), pair.target.as_ref(), policy);
    Some(DiffOutcome::from_differences(
        pair.key,
        pair.source,
        pair.target,
        differences,
    ))
}
