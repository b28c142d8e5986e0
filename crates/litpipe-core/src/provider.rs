//! Traits at the seams between the scheduler and the I/O-heavy components.
//!
//! The pipeline drives a [`MetadataProvider`] for enrichment and a
//! [`FulltextResolver`] for downloads; both are injected so tests can stub
//! them without any network.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;

use crate::record::{Enrichment, ReferenceRecord};

/// Boxed future used by provider trait methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected response shape: {0}")]
    Parse(String),
}

/// Outcome of one enrichment attempt.
#[derive(Debug, Clone)]
pub enum EnrichOutcome {
    /// A candidate cleared the confidence threshold.
    Matched(Box<Enrichment>),
    /// Every cascade step came back empty or below threshold.
    NoMatch,
    /// The daily budget for the backing services is spent.
    QuotaExhausted,
}

/// Resolves a sparse reference to authoritative bibliographic metadata.
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn enrich<'a>(
        &'a self,
        record: &'a ReferenceRecord,
    ) -> ProviderFuture<'a, Result<EnrichOutcome, ProviderError>>;
}

/// A full text successfully fetched and validated.
#[derive(Debug, Clone)]
pub struct ResolvedDownload {
    pub file_path: PathBuf,
    /// SHA-256 of the saved bytes, lowercase hex.
    pub checksum: String,
    /// Which source produced the file (e.g. "unpaywall", "sci-hub").
    pub source: String,
}

/// Outcome of one download attempt across the whole source cascade.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Downloaded(ResolvedDownload),
    /// Every source failed or produced an invalid PDF.
    Exhausted,
    /// Every source refused on daily quota.
    QuotaExhausted,
}

/// Tries a cascade of full-text sources for a reference.
pub trait FulltextResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        record: &'a ReferenceRecord,
        target_dir: &'a Path,
    ) -> ProviderFuture<'a, Result<ResolveOutcome, ProviderError>>;
}
