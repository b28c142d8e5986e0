//! The queueing stage: `with_metadata` → `to_download_references`.
//!
//! Purely database-bound, so it runs sequentially: for each row a fresh
//! duplicate check against the whole database (identifiers everywhere,
//! title+authors within staged tables) decides between the queue and the
//! duplicate archive.

use litpipe_core::record::Stage;
use litpipe_store::MoveOutcome;

use crate::{BatchStats, Pipeline, PipelineError};

/// Move up to `limit` enriched rows into the download queue.
pub async fn queue_batch(pipeline: &Pipeline, limit: usize) -> Result<BatchStats, PipelineError> {
    let batch = {
        let store = pipeline.store.lock().unwrap_or_else(|e| e.into_inner());
        store.fetch_batch(Stage::WithMetadata, limit)?
    };

    let mut stats = BatchStats::default();
    for record in batch {
        if pipeline.cancel.is_cancelled() {
            break;
        }
        let Some(id) = record.id else { continue };
        stats.processed += 1;

        let store = pipeline.store.lock().unwrap_or_else(|e| e.into_inner());
        match store.queue_for_download(id)? {
            MoveOutcome::Moved(queue_id) => {
                stats.promoted += 1;
                tracing::info!(
                    ref_id = id,
                    queue_id,
                    stage = "queue",
                    outcome = "queued",
                    "reference queued for download"
                );
            }
            MoveOutcome::Duplicate(existing) => {
                stats.skipped_duplicate += 1;
                tracing::info!(
                    ref_id = id,
                    stage = "queue",
                    outcome = "duplicate",
                    existing_table = %existing.table,
                    existing_id = existing.id,
                    matched = existing.matched_field.as_str(),
                    "already present, sent to duplicates"
                );
            }
        }
    }
    Ok(stats)
}
