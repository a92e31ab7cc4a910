//! Per-collection comparison driver.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use compare_core::{
    run_comparison, select_keys, CollectionSpec, ExcludePolicy, KeySource, RunAggregator,
    RunOptions,
};
use tokio_util::sync::CancellationToken;

use crate::clients::cosmos::CosmosSource;
use crate::clients::mongo::MongoTarget;
use crate::config::AppConfig;
use crate::report::MismatchLog;

/// Run the configured comparison. Returns `true` when any collection had a
/// mismatch, a missing document, a fetch error, or an incomplete run.
pub async fn run_compare(
    config: &AppConfig,
    collection: Option<&str>,
    all_collections: bool,
    cancel: CancellationToken,
) -> anyhow::Result<bool> {
    let sampling = config.sampling_spec();

    let source = Arc::new(
        CosmosSource::connect(&config.cosmos.uri, &config.cosmos.database)
            .await
            .context("Failed to connect to Cosmos source")?,
    );
    let target = Arc::new(
        MongoTarget::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .context("Failed to connect to MongoDB target")?,
    );

    let names: Vec<String> = if let Some(name) = collection {
        vec![name.to_string()]
    } else if all_collections {
        source
            .list_collections()
            .await
            .context("Failed to list source collections")?
    } else {
        config.configured_collections()
    };
    if names.is_empty() {
        anyhow::bail!("No collections selected; configure `collections` or pass --collection");
    }

    let mut any_failures = false;
    for name in &names {
        if cancel.is_cancelled() {
            tracing::warn!("Cancelled before collection {name}, stopping");
            any_failures = true;
            break;
        }
        let spec = match config.collection_spec(name)? {
            Some(spec) => spec,
            None => {
                tracing::warn!("Collection {name} has no configuration entry, skipping");
                continue;
            }
        };
        if !spec.enabled {
            tracing::info!("Collection {name} is disabled, skipping");
            continue;
        }
        let report_failed = compare_collection(
            config,
            &spec,
            &sampling,
            source.clone(),
            target.clone(),
            cancel.clone(),
        )
        .await?;
        any_failures |= report_failed;
    }
    Ok(any_failures)
}

async fn compare_collection(
    config: &AppConfig,
    spec: &CollectionSpec,
    sampling: &compare_core::SamplingSpec,
    source: Arc<CosmosSource>,
    target: Arc<MongoTarget>,
    cancel: CancellationToken,
) -> anyhow::Result<bool> {
    let name = &spec.name;
    tracing::info!("Comparing collection {name} on field {}", spec.business_key_field);

    let counting = Instant::now();
    let source_total = source.estimate_size(name).await?;
    let target_total = target.count_documents(name).await?;
    tracing::info!(
        "Collection {name}: source_total={source_total} target_total={target_total} ({:?})",
        counting.elapsed()
    );

    let scanning = Instant::now();
    let keys = select_keys(name, &spec.business_key_field, sampling, source.as_ref())
        .await
        .with_context(|| format!("Key sampling failed for collection {name}"))?;
    tracing::info!(
        "Collection {name}: sampled {} keys in {:?}",
        keys.len(),
        scanning.elapsed()
    );

    let mut aggregator = RunAggregator::new(name, source_total, target_total, keys.len() as u64);
    let policy = Arc::new(ExcludePolicy::new(spec.exclude_fields.clone()));
    let options = RunOptions {
        source_lookup_concurrency: sampling.source_lookup_concurrency,
        compare_concurrency: sampling.compare_concurrency,
        ..RunOptions::default()
    };

    let comparing = Instant::now();
    let complete = run_comparison(
        name.clone(),
        spec.business_key_field.clone(),
        keys,
        source,
        target,
        policy,
        options,
        cancel,
        &mut aggregator,
    )
    .await;
    let report = aggregator.finalize(complete);
    tracing::info!(
        "Collection {name}: compared {} documents in {:?}",
        report.summary.compared,
        comparing.elapsed()
    );

    let mut log = MismatchLog::create(
        &config.logging.output_dir,
        name,
        &spec.business_key_field,
    )?;
    for outcome in &report.failures {
        log.append(outcome)?;
    }
    log.finish()?;

    tracing::info!("{}", report.summary.log_line());
    Ok(report.summary.has_failures() || !report.summary.complete)
}
