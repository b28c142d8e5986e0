//! Full-text acquisition: an ordered cascade over open and gray sources.
//!
//! Each source yields `Ok(bytes)` or a typed failure; the cascade is a
//! fold over the ordered list, and the first payload that passes PDF
//! validation wins. Per-source failures are logged and skipped; only when
//! every source fails does the reference as a whole fail.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

use litpipe_core::authors::split_name;
use litpipe_core::normalize::normalize_doi;
use litpipe_core::provider::{
    FulltextResolver, ProviderError, ProviderFuture, ResolveOutcome, ResolvedDownload,
};
use litpipe_core::rate_limit::{ServiceRateLimiter, check_rate_limit_response};
use litpipe_core::record::ReferenceRecord;

pub mod html;
pub mod libgen;
pub mod scihub;
pub mod unpaywall;
pub mod validate;

mod save;

pub use save::{sha256_hex, synthesize_filename};
pub use validate::{PdfIssue, check_pdf};

/// How many link hops a single source may follow (landing page → PDF).
const MAX_HOPS: usize = 3;

/// How many LibGen mirror links to try before giving up on the source.
const LIBGEN_LINK_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("daily quota exhausted")]
    Quota,
    #[error("not found (404)")]
    NotFound,
    #[error("http error: {0}")]
    Http(String),
    #[error("no pdf link found")]
    NoPdfLink,
    /// The source needs data this reference doesn't carry (e.g. a DOI).
    #[error("source not applicable")]
    NotApplicable,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Contact address; Unpaywall requires one and is skipped without it.
    pub mailto: Option<String>,
    pub scihub_mirrors: Vec<String>,
    pub libgen_enabled: bool,
    pub libgen_base_url: String,
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            mailto: None,
            scihub_mirrors: scihub::DEFAULT_MIRRORS.iter().map(|s| s.to_string()).collect(),
            libgen_enabled: true,
            libgen_base_url: libgen::DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// The five source classes, in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    DirectUrl,
    DoiResolver,
    Unpaywall,
    SciHub,
    LibGen,
}

impl Source {
    const CASCADE: [Source; 5] = [
        Source::DirectUrl,
        Source::DoiResolver,
        Source::Unpaywall,
        Source::SciHub,
        Source::LibGen,
    ];

    fn tag(&self) -> &'static str {
        match self {
            Source::DirectUrl => "direct_url",
            Source::DoiResolver => "doi",
            Source::Unpaywall => "unpaywall",
            Source::SciHub => "sci-hub",
            Source::LibGen => "libgen",
        }
    }
}

/// What one HTTP round-trip produced.
enum Fetched {
    Pdf(Vec<u8>),
    /// A further link to follow (JSON `pdf_url`, HTML PDF anchor, …).
    Next(String),
    /// Parseable page with nothing PDF-like on it.
    Dead,
}

pub struct DownloadCascade {
    client: reqwest::Client,
    limiter: Arc<ServiceRateLimiter>,
    options: DownloadOptions,
    /// Rotating start index into the Sci-Hub mirror list.
    mirror_cursor: AtomicUsize,
}

impl DownloadCascade {
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<ServiceRateLimiter>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            client,
            limiter,
            options,
            mirror_cursor: AtomicUsize::new(0),
        }
    }

    /// Mirror list starting at the rotation cursor; the cursor advances
    /// once per invocation so load spreads across mirrors.
    fn rotated_mirrors(&self) -> Vec<String> {
        let mirrors = &self.options.scihub_mirrors;
        if mirrors.is_empty() {
            return vec![];
        }
        let start = self.mirror_cursor.fetch_add(1, Ordering::Relaxed) % mirrors.len();
        (0..mirrors.len())
            .map(|i| mirrors[(start + i) % mirrors.len()].clone())
            .collect()
    }

    async fn fetch_once(&self, url: &str, service: &str) -> Result<Fetched, FetchError> {
        if !self.limiter.acquire(service).await {
            return Err(FetchError::Quota);
        }

        let resp = self
            .client
            .get(url)
            .header("User-Agent", "Mozilla/5.0")
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Err(FetchError::NotFound);
        }
        if let Err(hit) = check_rate_limit_response(&resp) {
            self.limiter.report_error(service, "HTTP 429");
            return Err(FetchError::Http(hit.to_string()));
        }
        if !resp.status().is_success() {
            return Err(FetchError::Http(format!("HTTP {}", resp.status())));
        }

        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if content_type.contains("application/pdf") {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| FetchError::Http(e.to_string()))?;
            self.limiter.report_success(service);
            return Ok(Fetched::Pdf(bytes.to_vec()));
        }

        if content_type.contains("json") {
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| FetchError::Http(e.to_string()))?;
            self.limiter.report_success(service);
            return Ok(match body.get("pdf_url").and_then(|v| v.as_str()) {
                Some(next) => Fetched::Next(next.to_string()),
                None => Fetched::Dead,
            });
        }

        if content_type.contains("html") || content_type.contains("text") {
            let text = resp
                .text()
                .await
                .map_err(|e| FetchError::Http(e.to_string()))?;
            self.limiter.report_success(service);
            return Ok(match html::extract_pdf_link(&text, &final_url) {
                Some(next) => Fetched::Next(next),
                None => Fetched::Dead,
            });
        }

        // Unlabeled payload: accept it if it carries the PDF header and
        // let validation decide.
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        self.limiter.report_success(service);
        if bytes.starts_with(b"%PDF-") {
            Ok(Fetched::Pdf(bytes.to_vec()))
        } else {
            Ok(Fetched::Dead)
        }
    }

    /// Follow a URL to PDF bytes, unwrapping landing pages. Never revisits
    /// a URL (cycle guard) and gives up after a few hops.
    async fn fetch_pdf(&self, start_url: &str, service: &str) -> Result<Vec<u8>, FetchError> {
        let mut url = start_url.to_string();
        let mut visited: HashSet<String> = HashSet::new();
        for _ in 0..MAX_HOPS {
            if !visited.insert(url.clone()) {
                return Err(FetchError::NoPdfLink);
            }
            match self.fetch_once(&url, service).await? {
                Fetched::Pdf(bytes) => return Ok(bytes),
                Fetched::Next(next) => url = next,
                Fetched::Dead => return Err(FetchError::NoPdfLink),
            }
        }
        Err(FetchError::NoPdfLink)
    }

    async fn try_direct(&self, record: &ReferenceRecord) -> Result<Vec<u8>, FetchError> {
        let url = record.url_source.as_deref().ok_or(FetchError::NotApplicable)?;
        self.fetch_pdf(url, "direct").await
    }

    async fn try_doi_resolver(&self, record: &ReferenceRecord) -> Result<Vec<u8>, FetchError> {
        let doi = record
            .doi
            .as_deref()
            .and_then(normalize_doi)
            .ok_or(FetchError::NotApplicable)?;
        self.fetch_pdf(&format!("https://doi.org/{doi}"), "doi").await
    }

    async fn try_unpaywall(&self, record: &ReferenceRecord) -> Result<Vec<u8>, FetchError> {
        let doi = record
            .doi
            .as_deref()
            .and_then(normalize_doi)
            .ok_or(FetchError::NotApplicable)?;
        let email = self
            .options
            .mailto
            .as_deref()
            .ok_or(FetchError::NotApplicable)?;

        if !self.limiter.acquire("unpaywall").await {
            return Err(FetchError::Quota);
        }
        let resp = self
            .client
            .get(unpaywall::lookup_url(&doi, email))
            .header("User-Agent", "Mozilla/5.0")
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Err(FetchError::NotFound);
        }
        if let Err(hit) = check_rate_limit_response(&resp) {
            self.limiter.report_error("unpaywall", "HTTP 429");
            return Err(FetchError::Http(hit.to_string()));
        }
        if !resp.status().is_success() {
            return Err(FetchError::Http(format!("HTTP {}", resp.status())));
        }
        let parsed: unpaywall::UnpaywallResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        self.limiter.report_success("unpaywall");

        let pdf_url = parsed
            .best_oa_location
            .and_then(|l| l.url_for_pdf)
            .ok_or(FetchError::NoPdfLink)?;
        self.fetch_pdf(&pdf_url, "unpaywall").await
    }

    async fn try_scihub(&self, record: &ReferenceRecord) -> Result<Vec<u8>, FetchError> {
        let doi = record
            .doi
            .as_deref()
            .and_then(normalize_doi)
            .ok_or(FetchError::NotApplicable)?;

        for mirror in self.rotated_mirrors() {
            if !self.limiter.acquire("scihub").await {
                return Err(FetchError::Quota);
            }
            let page = self
                .client
                .get(format!("{mirror}/{doi}"))
                .header("User-Agent", "Mozilla/5.0")
                .timeout(self.options.timeout)
                .send()
                .await;
            let resp = match page {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(mirror, error = %e, "mirror unreachable, trying next");
                    continue;
                }
            };
            // A mirror that answers 404 is authoritative: the content is
            // identical across mirrors, so stop scanning.
            if resp.status().as_u16() == 404 {
                return Err(FetchError::NotFound);
            }
            if !resp.status().is_success() {
                tracing::debug!(mirror, status = %resp.status(), "mirror error, trying next");
                continue;
            }
            let text = match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(mirror, error = %e, "mirror body unreadable, trying next");
                    continue;
                }
            };
            return match scihub::extract_pdf_link(&text, &mirror) {
                Some(link) => {
                    tracing::debug!(mirror, link, "sci-hub pdf link found");
                    self.fetch_pdf(&link, "scihub").await
                }
                None => Err(FetchError::NoPdfLink),
            };
        }
        Err(FetchError::Http("no reachable mirror".into()))
    }

    async fn try_libgen(&self, record: &ReferenceRecord) -> Result<Vec<u8>, FetchError> {
        if !self.options.libgen_enabled {
            return Err(FetchError::NotApplicable);
        }
        let title = record.title.as_deref().ok_or(FetchError::NotApplicable)?;
        let surname = record
            .authors
            .first()
            .and_then(|name| split_name(name))
            .map(|(_, last)| last);
        let is_book = record
            .entry_type
            .as_deref()
            .is_some_and(|t| matches!(t.to_lowercase().as_str(), "book" | "monograph"));

        if !self.limiter.acquire("libgen").await {
            return Err(FetchError::Quota);
        }
        let url = libgen::search_url(&self.options.libgen_base_url, title, surname.as_deref());
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0")
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Http(format!("HTTP {}", resp.status())));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        self.limiter.report_success("libgen");

        let hits = libgen::parse_results(&text, &self.options.libgen_base_url, is_book);
        if hits.is_empty() {
            return Err(FetchError::NotFound);
        }
        for hit in hits.iter().take(LIBGEN_LINK_LIMIT) {
            match self.fetch_pdf(&hit.url, "libgen").await {
                Ok(bytes) if bytes.starts_with(b"%PDF-") => return Ok(bytes),
                Ok(_) => continue,
                Err(FetchError::Quota) => return Err(FetchError::Quota),
                Err(e) => {
                    tracing::debug!(url = %hit.url, error = %e, "libgen link failed");
                }
            }
        }
        Err(FetchError::NoPdfLink)
    }

    async fn try_source(
        &self,
        source: Source,
        record: &ReferenceRecord,
    ) -> Result<Vec<u8>, FetchError> {
        match source {
            Source::DirectUrl => self.try_direct(record).await,
            Source::DoiResolver => self.try_doi_resolver(record).await,
            Source::Unpaywall => self.try_unpaywall(record).await,
            Source::SciHub => self.try_scihub(record).await,
            Source::LibGen => self.try_libgen(record).await,
        }
    }

    /// Run the cascade for one reference. Each source is attempted at most
    /// once; the first payload passing validation is saved and returned.
    pub async fn resolve_record(
        &self,
        record: &ReferenceRecord,
        target_dir: &Path,
    ) -> Result<ResolveOutcome, ProviderError> {
        let mut attempts = 0usize;
        let mut quota_refusals = 0usize;

        for source in Source::CASCADE {
            let tag = source.tag();
            match self.try_source(source, record).await {
                Ok(bytes) => {
                    attempts += 1;
                    match validate::check_pdf(&bytes, record.entry_type.as_deref()) {
                        Ok(pages) => match save::save_pdf(&bytes, record, target_dir) {
                            Ok((file_path, checksum)) => {
                                tracing::info!(
                                    ref_id = record.id,
                                    source = tag,
                                    pages,
                                    path = %file_path.display(),
                                    "full text downloaded"
                                );
                                return Ok(ResolveOutcome::Downloaded(ResolvedDownload {
                                    file_path,
                                    checksum,
                                    source: tag.to_string(),
                                }));
                            }
                            Err(e) => {
                                tracing::warn!(source = tag, error = %e, "save failed, trying next source");
                            }
                        },
                        Err(issue) => {
                            tracing::warn!(source = tag, %issue, "payload rejected, trying next source");
                        }
                    }
                }
                Err(FetchError::NotApplicable) => {}
                Err(FetchError::Quota) => {
                    attempts += 1;
                    quota_refusals += 1;
                    tracing::debug!(source = tag, "skipped on daily quota");
                }
                Err(e) => {
                    attempts += 1;
                    tracing::debug!(source = tag, error = %e, "source failed");
                }
            }
        }

        if attempts > 0 && quota_refusals == attempts {
            Ok(ResolveOutcome::QuotaExhausted)
        } else {
            Ok(ResolveOutcome::Exhausted)
        }
    }
}

impl FulltextResolver for DownloadCascade {
    fn resolve<'a>(
        &'a self,
        record: &'a ReferenceRecord,
        target_dir: &'a Path,
    ) -> ProviderFuture<'a, Result<ResolveOutcome, ProviderError>> {
        Box::pin(self.resolve_record(record, target_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade(options: DownloadOptions) -> DownloadCascade {
        DownloadCascade::new(
            reqwest::Client::new(),
            Arc::new(ServiceRateLimiter::empty()),
            options,
        )
    }

    #[test]
    fn mirrors_rotate_between_invocations() {
        let c = cascade(DownloadOptions {
            scihub_mirrors: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        });
        assert_eq!(c.rotated_mirrors(), vec!["a", "b", "c"]);
        assert_eq!(c.rotated_mirrors(), vec!["b", "c", "a"]);
        assert_eq!(c.rotated_mirrors(), vec!["c", "a", "b"]);
        assert_eq!(c.rotated_mirrors(), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_mirror_list_is_fine() {
        let c = cascade(DownloadOptions {
            scihub_mirrors: vec![],
            ..Default::default()
        });
        assert!(c.rotated_mirrors().is_empty());
    }

    #[tokio::test]
    async fn nothing_applicable_exhausts_without_network() {
        // No URL, no DOI, no title, LibGen disabled: every source reports
        // NotApplicable and the cascade exhausts with zero HTTP calls.
        let c = cascade(DownloadOptions {
            libgen_enabled: false,
            ..Default::default()
        });
        let record = ReferenceRecord::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = c.resolve_record(&record, dir.path()).await.unwrap();
        assert!(matches!(outcome, ResolveOutcome::Exhausted));
    }

    #[tokio::test]
    async fn daily_quota_refusal_reported_as_quota_outcome() {
        // Register every relevant service with a zero-size daily budget;
        // all applicable sources refuse and the outcome says so.
        let mut limiter = ServiceRateLimiter::empty();
        for svc in ["doi", "unpaywall", "scihub", "libgen"] {
            limiter.register(svc, litpipe_core::ServiceLimits::default().with_rpd(0));
        }
        let c = DownloadCascade::new(
            reqwest::Client::new(),
            Arc::new(limiter),
            DownloadOptions {
                mailto: Some("me@example.org".into()),
                libgen_enabled: true,
                ..Default::default()
            },
        );
        let mut record = ReferenceRecord::seed("Quota Bound Paper");
        record.doi = Some("10.1/quota".into());
        let dir = tempfile::tempdir().unwrap();
        let outcome = c.resolve_record(&record, dir.path()).await.unwrap();
        assert!(matches!(outcome, ResolveOutcome::QuotaExhausted));
    }
}
