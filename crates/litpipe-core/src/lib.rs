pub mod authors;
pub mod config_file;
pub mod normalize;
pub mod provider;
pub mod rate_limit;
pub mod record;

// Re-export for convenience
pub use normalize::{normalize_authors, normalize_doi, normalize_openalex_id, normalize_title};
pub use provider::{
    EnrichOutcome, FulltextResolver, MetadataProvider, ProviderError, ResolveOutcome,
    ResolvedDownload,
};
pub use rate_limit::{RateLimitHit, ServiceLimits, ServiceRateLimiter, check_rate_limit_response};
pub use record::{Enrichment, MetadataSource, ReferenceRecord, RelatedWork, Stage};
