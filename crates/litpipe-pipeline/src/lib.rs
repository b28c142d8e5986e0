//! The pipeline scheduler.
//!
//! Drains each stage in batches: `no_metadata` through the matcher into
//! `with_metadata`, `with_metadata` through a fresh duplicate check into
//! the download queue, and the queue through the resolver into the corpus.
//! Workers only do I/O; every stage-move transaction runs in the single
//! dispatcher that consumes their results, so the store never sees
//! concurrent writers and a crash can only ever leave a row where it was.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use litpipe_store::StoreError;

mod download;
mod enrich;
mod queue;

pub use download::download_batch;
pub use enrich::enrich_batch;
pub use queue::queue_batch;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Counters returned by every batch. `processed` counts references whose
/// outcome was decided this batch; cancelled-before-start references stay
/// in their stage and are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub promoted: usize,
    pub failed: usize,
    pub skipped_duplicate: usize,
}

/// Shared handle bundling the store and the process-wide cancellation
/// signal. Cloning is cheap; all clones drain the same database.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) store: Arc<Mutex<litpipe_store::LiteratureStore>>,
    pub(crate) cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        store: Arc<Mutex<litpipe_store::LiteratureStore>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { store, cancel }
    }

    pub fn store(&self) -> &Arc<Mutex<litpipe_store::LiteratureStore>> {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
