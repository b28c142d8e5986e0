//! The download stage: `to_download_references` → `downloaded_references`
//! (or `failed_downloads`).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use litpipe_core::provider::{FulltextResolver, ProviderError, ResolveOutcome};
use litpipe_core::record::{ReferenceRecord, Stage};

use crate::{BatchStats, Pipeline, PipelineError};

type DownloadResult = (
    ReferenceRecord,
    Result<ResolveOutcome, ProviderError>,
    std::time::Duration,
);

/// Drain up to `limit` queue rows through the resolver with a bounded
/// worker pool.
///
/// Workers each hold one reference at a time and only perform I/O; their
/// completions feed a single dispatcher which runs the stage-move
/// transaction. Cancellation stops workers from picking up new items;
/// in-flight items either finish their move or stay queued untouched.
pub async fn download_batch(
    pipeline: &Pipeline,
    resolver: Arc<dyn FulltextResolver>,
    target_dir: &Path,
    limit: usize,
    concurrency: usize,
) -> Result<BatchStats, PipelineError> {
    let batch = {
        let store = pipeline.store.lock().unwrap_or_else(|e| e.into_inner());
        store.fetch_batch(Stage::ToDownload, limit)?
    };
    if batch.is_empty() {
        return Ok(BatchStats::default());
    }

    let (job_tx, job_rx) = async_channel::bounded::<ReferenceRecord>(batch.len());
    let (result_tx, mut result_rx) = tokio::sync::mpsc::channel::<DownloadResult>(batch.len());

    for record in batch {
        let _ = job_tx.send(record).await;
    }
    job_tx.close();

    let mut workers = Vec::with_capacity(concurrency.max(1));
    for _ in 0..concurrency.max(1) {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let resolver = resolver.clone();
        let cancel = pipeline.cancel.clone();
        let dir = target_dir.to_path_buf();
        workers.push(tokio::spawn(async move {
            while let Ok(record) = job_rx.recv().await {
                if cancel.is_cancelled() {
                    break;
                }
                let started = Instant::now();
                let outcome = resolver.resolve(&record, &dir).await;
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
            Ok(ResolveOutcome::Downloaded(resolved)) => {
                let new_id = store.complete_download(
                    id,
                    &resolved.file_path.to_string_lossy(),
                    &resolved.checksum,
                    &resolved.source,
                )?;
                stats.promoted += 1;
                tracing::info!(
                    ref_id = id,
                    new_id,
                    stage = "download",
                    outcome = "downloaded",
                    source = %resolved.source,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "full text archived"
                );
            }
            Ok(ResolveOutcome::Exhausted) => {
                store.record_failure(id, Stage::ToDownload, "download_failed")?;
                stats.failed += 1;
                tracing::info!(
                    ref_id = id,
                    stage = "download",
                    outcome = "failed",
                    elapsed_ms = elapsed.as_millis() as u64,
                    "every source failed"
                );
            }
            Ok(ResolveOutcome::QuotaExhausted) => {
                store.record_failure(id, Stage::ToDownload, "quota_exhausted")?;
                stats.failed += 1;
                tracing::warn!(
                    ref_id = id,
                    stage = "download",
                    outcome = "quota_exhausted",
                    "deferred until quota rollover"
                );
            }
            Err(e) => {
                store.record_failure(id, Stage::ToDownload, "download_failed")?;
                stats.failed += 1;
                tracing::warn!(
                    ref_id = id,
                    stage = "download",
                    outcome = "error",
                    error = %e,
                    "resolver error"
                );
            }
        }
    }

    for worker in workers {
        let _ = worker.await;
    }
    Ok(stats)
}
