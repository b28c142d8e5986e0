pub mod cascade;
mod client;
pub mod crossref;
pub mod keyword;
pub mod matcher;
pub mod work;

pub use keyword::{KeywordError, KeywordSearcher, SearchFilters, SearchHit, normalize_query};
pub use matcher::{MatcherOptions, OpenAlexMatcher};
pub use work::{OpenAlexWork, build_enrichment, decode_abstract};
