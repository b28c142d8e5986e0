//! The enrichment stage: `no_metadata` → `with_metadata`.

use std::sync::Arc;
use std::time::Instant;

use litpipe_core::provider::{EnrichOutcome, MetadataProvider, ProviderError};
use litpipe_core::record::{ReferenceRecord, Stage};
use litpipe_store::MoveOutcome;

use crate::{BatchStats, Pipeline, PipelineError};

type EnrichResult = (
    ReferenceRecord,
    Result<EnrichOutcome, ProviderError>,
    std::time::Duration,
);

/// Drain up to `limit` rows of `no_metadata` through the matcher.
///
/// Workers call the provider concurrently; the dispatcher applies each
/// outcome as a single stage-move transaction. A match promotes the row
/// (and records any related-work edges), a miss moves it to
/// `failed_enrichments`, and a quota refusal defers it with a reason the
/// admin retry can pick out.
pub async fn enrich_batch(
    pipeline: &Pipeline,
    provider: Arc<dyn MetadataProvider>,
    limit: usize,
    concurrency: usize,
) -> Result<BatchStats, PipelineError> {
    let batch = {
        let store = pipeline.store.lock().unwrap_or_else(|e| e.into_inner());
        store.fetch_batch(Stage::NoMetadata, limit)?
    };
    if batch.is_empty() {
        return Ok(BatchStats::default());
    }

    let (job_tx, job_rx) = async_channel::bounded::<ReferenceRecord>(batch.len());
    let (result_tx, mut result_rx) = tokio::sync::mpsc::channel::<EnrichResult>(batch.len());

    for record in batch {
        let _ = job_tx.send(record).await;
    }
    job_tx.close();

    let mut workers = Vec::with_capacity(concurrency.max(1));
    for _ in 0..concurrency.max(1) {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let provider = provider.clone();
        let cancel = pipeline.cancel.clone();
        workers.push(tokio::spawn(async move {
            while let Ok(record) = job_rx.recv().await {
                if cancel.is_cancelled() {
                    break;
                }
                let started = Instant::now();
                let outcome = provider.enrich(&record).await;
                if result_tx.send((record, outcome, started.elapsed())).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut stats = BatchStats::default();
    while let Some((record, outcome, elapsed)) = result_rx.recv().await {
        let Some(id) = record.id else { continue };
        stats.processed += 1;

        let store = pipeline.store.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Ok(EnrichOutcome::Matched(enrichment)) => {
                match store.promote_enriched(id, &enrichment)? {
                    MoveOutcome::Moved(new_id) => {
                        stats.promoted += 1;
                        if let Some(work_id) = enrichment.openalex_id.as_deref() {
                            if !enrichment.referenced_works.is_empty() {
                                store.record_citation_edges(
                                    work_id,
                                    &enrichment.referenced_works,
                                    "references",
                                )?;
                            }
                            if !enrichment.citing_works.is_empty() {
                                store.record_citation_edges(
                                    work_id,
                                    &enrichment.citing_works,
                                    "cited_by",
                                )?;
                            }
                        }
                        tracing::info!(
                            ref_id = id,
                            new_id,
                            stage = "enrich",
                            outcome = "promoted",
                            step = enrichment.first_found_in_step,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "reference enriched"
                        );
                    }
                    MoveOutcome::Duplicate(existing) => {
                        stats.skipped_duplicate += 1;
                        tracing::info!(
                            ref_id = id,
                            stage = "enrich",
                            outcome = "duplicate",
                            existing_table = %existing.table,
                            existing_id = existing.id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "enriched into existing identity"
                        );
                    }
                }
            }
            Ok(EnrichOutcome::NoMatch) => {
                store.record_failure(id, Stage::NoMetadata, "metadata_fetch_failed")?;
                stats.failed += 1;
                tracing::info!(
                    ref_id = id,
                    stage = "enrich",
                    outcome = "failed",
                    elapsed_ms = elapsed.as_millis() as u64,
                    "no confident match"
                );
            }
            Ok(EnrichOutcome::QuotaExhausted) => {
                store.record_failure(id, Stage::NoMetadata, "quota_exhausted")?;
                stats.failed += 1;
                tracing::warn!(
                    ref_id = id,
                    stage = "enrich",
                    outcome = "quota_exhausted",
                    "deferred until quota rollover"
                );
            }
            Err(e) => {
                store.record_failure(id, Stage::NoMetadata, "metadata_fetch_failed")?;
                stats.failed += 1;
                tracing::warn!(
                    ref_id = id,
                    stage = "enrich",
                    outcome = "error",
                    error = %e,
                    "matcher error"
                );
            }
        }
    }

    for worker in workers {
        let _ = worker.await;
    }
    Ok(stats)
}
