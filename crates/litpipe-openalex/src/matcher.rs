//! The multi-step reference matcher.
//!
//! Runs the cascade of [`crate::cascade`] queries, pools every result by
//! work id, scores candidates against the reference's authors and editors,
//! and accepts only a high-confidence winner. A DOI hit on step 0 is
//! authoritative and skips author scoring entirely.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use litpipe_core::authors::author_match_score;
use litpipe_core::normalize::{normalize_doi, normalize_openalex_id, normalize_title_compact};
use litpipe_core::provider::{EnrichOutcome, MetadataProvider, ProviderError, ProviderFuture};
use litpipe_core::rate_limit::ServiceRateLimiter;
use litpipe_core::record::{Enrichment, ReferenceRecord, RelatedWork};

use crate::cascade::{StepQuery, build_step_query};
use crate::client::{FetchFailure, get_json};
use crate::crossref::CrossrefResponse;
use crate::work::{OpenAlexWork, WORK_SELECT, WorksPage, build_enrichment};

const OPENALEX_WORKS: &str = "https://api.openalex.org/works";
const CROSSREF_WORKS: &str = "https://api.crossref.org/works";

/// Slimmer select list for referenced/citing work listings.
const RELATED_SELECT: &str = "id,doi,display_name,authorships,publication_year,type";

/// A candidate must clear this author score to be accepted.
const ACCEPT_THRESHOLD: f64 = 0.85;

/// Candidates within this margin of the top score form the tie cluster.
const TIE_MARGIN: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct MatcherOptions {
    pub mailto: Option<String>,
    pub fetch_references: bool,
    pub fetch_citations: bool,
    pub max_citations: usize,
    pub timeout: Duration,
    /// Batch endpoints (referenced-work lookups) get a longer leash.
    pub batch_timeout: Duration,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            mailto: None,
            fetch_references: true,
            fetch_citations: false,
            max_citations: 100,
            timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(60),
        }
    }
}

/// One pooled search result and the first step that produced it.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) work: OpenAlexWork,
    pub(crate) step: u8,
}

pub struct OpenAlexMatcher {
    client: reqwest::Client,
    limiter: Arc<ServiceRateLimiter>,
    options: MatcherOptions,
}

impl OpenAlexMatcher {
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<ServiceRateLimiter>,
        options: MatcherOptions,
    ) -> Self {
        Self {
            client,
            limiter,
            options,
        }
    }

    fn works_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = format!("{OPENALEX_WORKS}?select={WORK_SELECT}");
        for (name, value) in params {
            url.push_str(&format!("&{name}={}", urlencoding::encode(value)));
        }
        if let Some(mailto) = &self.options.mailto {
            url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
        }
        url
    }

    async fn openalex_page(
        &self,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<WorksPage, FetchFailure> {
        get_json(
            &self.client,
            &self.limiter,
            "openalex",
            &self.works_url(params),
            timeout,
            self.options.mailto.as_deref(),
        )
        .await
    }

    /// Step 0: direct DOI filter lookup.
    async fn lookup_doi(&self, doi: &str) -> Result<Option<OpenAlexWork>, FetchFailure> {
        let filter = format!("doi:{doi}");
        let page = self
            .openalex_page(&[("filter", &filter), ("per-page", "1")], self.options.timeout)
            .await?;
        Ok(page.results.into_iter().next())
    }

    /// Step 8: Crossref free query mapped into the shared work shape.
    async fn crossref_query(&self, query: &str) -> Result<Vec<OpenAlexWork>, FetchFailure> {
        let mut url = format!(
            "{CROSSREF_WORKS}?query={}&rows=10",
            urlencoding::encode(query)
        );
        if let Some(mailto) = &self.options.mailto {
            url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
        }
        let resp: CrossrefResponse = get_json(
            &self.client,
            &self.limiter,
            "crossref",
            &url,
            self.options.timeout,
            self.options.mailto.as_deref(),
        )
        .await?;
        Ok(resp
            .message
            .items
            .into_iter()
            .filter_map(|item| item.into_work())
            .collect())
    }

    async fn run_step(&self, query: &StepQuery) -> Result<Vec<OpenAlexWork>, FetchFailure> {
        match query {
            StepQuery::OpenAlexFilter(filter) => {
                let page = self
                    .openalex_page(
                        &[("filter", filter.as_str()), ("per-page", "10")],
                        self.options.timeout,
                    )
                    .await?;
                Ok(page.results)
            }
            StepQuery::OpenAlexSearch(term) => {
                let page = self
                    .openalex_page(
                        &[("search", term.as_str()), ("per-page", "10")],
                        self.options.timeout,
                    )
                    .await?;
                Ok(page.results)
            }
            StepQuery::Crossref(query) => self.crossref_query(query).await,
        }
    }

    /// Fetch details for referenced works in pipe-joined batches of 50.
    async fn fetch_referenced(&self, ids: &[String]) -> Vec<RelatedWork> {
        let mut out = Vec::new();
        for chunk in ids.chunks(50) {
            let batch: Vec<String> = chunk
                .iter()
                .filter_map(|id| normalize_openalex_id(id))
                .collect();
            if batch.is_empty() {
                continue;
            }
            let filter = format!("openalex_id:{}", batch.join("|"));
            let mut url = format!(
                "{OPENALEX_WORKS}?filter={}&select={RELATED_SELECT}&per-page=50",
                urlencoding::encode(&filter)
            );
            if let Some(mailto) = &self.options.mailto {
                url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
            }
            match get_json::<WorksPage>(
                &self.client,
                &self.limiter,
                "openalex",
                &url,
                self.options.batch_timeout,
                self.options.mailto.as_deref(),
            )
            .await
            {
                Ok(page) => out.extend(page.results.iter().filter_map(|w| w.to_related_work())),
                Err(e) => {
                    tracing::warn!(error = %e, "referenced-works batch failed, skipping");
                }
            }
        }
        out
    }

    /// Paginate the work's `cited_by_api_url` until enough citing works are
    /// collected or the pages run out.
    async fn fetch_citing(&self, cited_by_url: &str) -> Vec<RelatedWork> {
        let mut out: Vec<RelatedWork> = Vec::new();
        let mut page_no = 1usize;
        while out.len() < self.options.max_citations {
            let mut url = format!(
                "{cited_by_url}&select={RELATED_SELECT}&per-page=100&page={page_no}"
            );
            if let Some(mailto) = &self.options.mailto {
                url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
            }
            let page: WorksPage = match get_json(
                &self.client,
                &self.limiter,
                "openalex",
                &url,
                self.options.timeout,
                self.options.mailto.as_deref(),
            )
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(error = %e, page = page_no, "citing-works page failed, stopping");
                    break;
                }
            };
            if page.results.is_empty() {
                break;
            }
            out.extend(page.results.iter().filter_map(|w| w.to_related_work()));
            page_no += 1;
        }
        out.truncate(self.options.max_citations);
        out
    }

    async fn attach_related(&self, enrichment: &mut Enrichment, work: &OpenAlexWork) {
        if self.options.fetch_references && !work.referenced_works.is_empty() {
            enrichment.referenced_works = self.fetch_referenced(&work.referenced_works).await;
        }
        if self.options.fetch_citations
            && let Some(url) = &work.cited_by_api_url
        {
            enrichment.citing_works = self.fetch_citing(url).await;
        }
    }

    /// Run the full cascade for one reference.
    pub async fn match_reference(
        &self,
        record: &ReferenceRecord,
    ) -> Result<EnrichOutcome, ProviderError> {
        let title = record.title.as_deref();
        let container = record.container.as_deref();
        let year = record.year;
        let mut saw_quota = false;
        let mut saw_response = false;

        // Step 0: a DOI hit is authoritative, no author scoring.
        if let Some(doi) = record.doi.as_deref().and_then(normalize_doi) {
            match self.lookup_doi(&doi).await {
                Ok(Some(work)) => {
                    tracing::debug!(doi, work = ?work.id, "DOI short-circuit hit");
                    let mut enrichment = build_enrichment(&work, 0);
                    self.attach_related(&mut enrichment, &work).await;
                    return Ok(EnrichOutcome::Matched(Box::new(enrichment)));
                }
                Ok(None) => saw_response = true,
                Err(FetchFailure::Quota) => saw_quota = true,
                Err(FetchFailure::Other(e)) => {
                    tracing::warn!(doi, error = %e, "DOI lookup failed, falling back to search");
                }
            }
        }

        if title.is_none() && container.is_none() {
            return Ok(EnrichOutcome::NoMatch);
        }

        let mut pool: HashMap<String, Candidate> = HashMap::new();
        for step in 1..=9u8 {
            let Some(query) = build_step_query(step, title, container, year) else {
                continue;
            };
            match self.run_step(&query).await {
                Ok(works) => {
                    saw_response = true;
                    for work in works {
                        if let Some(key) = work.pool_key() {
                            pool.entry(key).or_insert(Candidate { work, step });
                        }
                    }
                }
                Err(FetchFailure::Quota) => saw_quota = true,
                Err(FetchFailure::Other(e)) => {
                    tracing::warn!(step, error = %e, "cascade step failed");
                }
            }
        }

        // Promote Crossref rows to OpenAlex records via their DOIs.
        let crossref_dois: BTreeSet<String> = pool
            .values()
            .filter(|c| c.work.is_crossref())
            .filter_map(|c| c.work.doi.as_deref().and_then(normalize_doi))
            .collect();
        for doi in crossref_dois {
            match self.lookup_doi(&doi).await {
                Ok(Some(work)) => {
                    if let Some(key) = work.pool_key() {
                        pool.entry(key).or_insert(Candidate { work, step: 0 });
                    }
                }
                Ok(None) => {}
                Err(FetchFailure::Quota) => saw_quota = true,
                Err(FetchFailure::Other(e)) => {
                    tracing::debug!(doi, error = %e, "crossref DOI promotion failed");
                }
            }
        }

        let candidates: Vec<Candidate> = pool.into_values().collect();
        let editors = record.editors();
        match select_candidate(&candidates, &record.authors, &editors, title, year) {
            Some(chosen) => {
                let mut enrichment = build_enrichment(&chosen.work, chosen.step);
                self.attach_related(&mut enrichment, &chosen.work).await;
                Ok(EnrichOutcome::Matched(Box::new(enrichment)))
            }
            None if candidates.is_empty() && saw_quota && !saw_response => {
                Ok(EnrichOutcome::QuotaExhausted)
            }
            None => Ok(EnrichOutcome::NoMatch),
        }
    }
}

/// Pick the winning candidate: best author score first, earliest step on
/// equal scores; reject unless the winner clears the confidence threshold.
/// When several candidates sit within the tie margin of the top score, the
/// cluster is re-ranked by exact normalized-title equality, then year
/// distance, then step.
pub(crate) fn select_candidate<'a>(
    candidates: &'a [Candidate],
    ref_authors: &[String],
    ref_editors: &[String],
    ref_title: Option<&str>,
    ref_year: Option<i64>,
) -> Option<&'a Candidate> {
    if candidates.is_empty() {
        return None;
    }

    let mut scored: Vec<(f64, &Candidate)> = candidates
        .iter()
        .map(|c| {
            let score = author_match_score(ref_authors, ref_editors, &c.work.author_names());
            (score, c)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.step.cmp(&b.1.step))
    });

    let top_score = scored[0].0;
    if top_score <= ACCEPT_THRESHOLD {
        return None;
    }

    let mut cluster: Vec<&(f64, &Candidate)> = scored
        .iter()
        .take_while(|(score, _)| top_score - score <= TIE_MARGIN)
        .collect();
    if cluster.len() == 1 {
        return Some(scored[0].1);
    }

    let ref_title_norm = ref_title.map(normalize_title_compact).filter(|t| !t.is_empty());
    cluster.sort_by_key(|(_, c)| {
        let title_equal = match (&ref_title_norm, c.work.display_name.as_deref()) {
            (Some(rt), Some(ct)) if *rt == normalize_title_compact(ct) => 0,
            _ => 1,
        };
        let year_distance = match (ref_year, c.work.publication_year) {
            (Some(r), Some(y)) => (r - y).abs(),
            _ => 999,
        };
        (title_equal, year_distance, c.step)
    });
    Some(cluster[0].1)
}

impl MetadataProvider for OpenAlexMatcher {
    fn name(&self) -> &str {
        "openalex"
    }

    fn enrich<'a>(
        &'a self,
        record: &'a ReferenceRecord,
    ) -> ProviderFuture<'a, Result<EnrichOutcome, ProviderError>> {
        Box::pin(self.match_reference(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::{AuthorRef, Authorship};

    fn work(
        id: &str,
        title: &str,
        authors: &[&str],
        year: Option<i64>,
    ) -> OpenAlexWork {
        OpenAlexWork {
            id: Some(format!("https://openalex.org/{id}")),
            display_name: Some(title.to_string()),
            authorships: authors
                .iter()
                .map(|name| Authorship {
                    author: Some(AuthorRef {
                        display_name: Some(name.to_string()),
                    }),
                })
                .collect(),
            publication_year: year,
            ..Default::default()
        }
    }

    fn cand(id: &str, title: &str, authors: &[&str], year: Option<i64>, step: u8) -> Candidate {
        Candidate {
            work: work(id, title, authors, year),
            step,
        }
    }

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_low_author_scores() {
        // Three distant candidates, none sharing an author surname.
        let candidates = vec![
            cand("W1", "Common Topic Name", &["Garcia, M."], Some(2020), 1),
            cand("W2", "Common Topic Name", &["Chen, L."], Some(2019), 2),
            cand("W3", "Common Topic Name", &["Okafor, P."], Some(2021), 3),
        ];
        let chosen = select_candidate(
            &candidates,
            &s(&["Smith, J."]),
            &[],
            Some("Common Topic Name"),
            Some(2020),
        );
        assert!(chosen.is_none());
    }

    #[test]
    fn accepts_clear_author_winner() {
        let candidates = vec![
            cand("W1", "A Paper", &["Nobody, Q."], Some(2020), 1),
            cand("W2", "A Paper", &["Jane Smith", "Wei Chen"], Some(2020), 3),
        ];
        let chosen = select_candidate(
            &candidates,
            &s(&["Smith, Jane", "Chen, Wei"]),
            &[],
            Some("A Paper"),
            Some(2020),
        )
        .expect("should accept");
        assert_eq!(chosen.work.id.as_deref(), Some("https://openalex.org/W2"));
    }

    #[test]
    fn tie_broken_by_exact_title() {
        let candidates = vec![
            cand("W1", "A Paper: Extended Edition", &["Jane Smith"], Some(2020), 1),
            cand("W2", "A Paper", &["Jane Smith"], Some(2020), 2),
        ];
        let chosen = select_candidate(
            &candidates,
            &s(&["Smith, Jane"]),
            &[],
            Some("A Paper"),
            Some(2020),
        )
        .expect("should accept");
        assert_eq!(chosen.work.id.as_deref(), Some("https://openalex.org/W2"));
    }

    #[test]
    fn tie_broken_by_year_distance() {
        let candidates = vec![
            cand("W1", "Different Phrasing Entirely", &["Jane Smith"], Some(2012), 1),
            cand("W2", "Also Not The Ref Title", &["Jane Smith"], Some(2020), 2),
        ];
        let chosen = select_candidate(
            &candidates,
            &s(&["Smith, Jane"]),
            &[],
            Some("An Unrelated Title"),
            Some(2019),
        )
        .expect("should accept");
        assert_eq!(chosen.work.id.as_deref(), Some("https://openalex.org/W2"));
    }

    #[test]
    fn tie_broken_by_step_last() {
        let candidates = vec![
            cand("W1", "Same Title", &["Jane Smith"], Some(2020), 5),
            cand("W2", "Same Title", &["Jane Smith"], Some(2020), 2),
        ];
        let chosen = select_candidate(
            &candidates,
            &s(&["Smith, Jane"]),
            &[],
            Some("Same Title"),
            Some(2020),
        )
        .expect("should accept");
        assert_eq!(chosen.work.id.as_deref(), Some("https://openalex.org/W2"));
    }

    #[test]
    fn editors_can_carry_the_match() {
        let candidates = vec![cand(
            "W1",
            "Handbook of Examples",
            &["Stuart Russell", "Peter Norvig"],
            Some(2010),
            4,
        )];
        let chosen = select_candidate(
            &candidates,
            &s(&["Unrelated, Z."]),
            &s(&["Russell, Stuart", "Norvig, Peter"]),
            Some("Handbook of Examples"),
            Some(2010),
        );
        assert!(chosen.is_some());
    }

    #[test]
    fn empty_pool_is_none() {
        assert!(select_candidate(&[], &s(&["Smith, J."]), &[], None, None).is_none());
    }
}
