//! Boolean keyword search against OpenAlex.
//!
//! Queries are validated and normalized (explicit ANDs, uppercase
//! operators, balanced parentheses) before being sent, then paginated with
//! OpenAlex cursors and deduplicated by work id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use litpipe_core::normalize::normalize_openalex_id;
use litpipe_core::rate_limit::ServiceRateLimiter;
use litpipe_core::record::{MetadataSource, ReferenceRecord};

use crate::client::{FetchFailure, get_json};
use crate::work::{OpenAlexWork, WORK_SELECT, WorksPage, build_enrichment};

const OPENALEX_WORKS: &str = "https://api.openalex.org/works";

#[derive(Debug, Error)]
pub enum KeywordError {
    #[error("query syntax error: {0}")]
    Syntax(String),
    #[error("openalex request failed: {0}")]
    Request(String),
    #[error("daily quota exhausted")]
    QuotaExhausted,
}

/// One deduplicated search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub openalex_id: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub authors: Vec<String>,
    pub work: OpenAlexWork,
}

impl SearchHit {
    fn from_work(work: OpenAlexWork) -> Self {
        Self {
            openalex_id: work.id.as_deref().and_then(normalize_openalex_id),
            doi: work.doi.clone(),
            title: work.display_name.clone(),
            year: work.publication_year,
            authors: work.author_names(),
            work,
        }
    }

    /// Convert into a seed record for `no_metadata`, carrying the full
    /// OpenAlex metadata so enrichment is a near no-op.
    pub fn into_record(self) -> ReferenceRecord {
        let enrichment = build_enrichment(&self.work, 0);
        ReferenceRecord {
            title: enrichment.title,
            authors: enrichment.authors,
            year: enrichment.year,
            doi: enrichment.doi,
            openalex_id: enrichment.openalex_id,
            abstract_text: enrichment.abstract_text,
            keywords: enrichment.keywords,
            container: enrichment.container,
            volume: enrichment.volume,
            issue: enrichment.issue,
            pages: enrichment.pages,
            publisher: enrichment.publisher,
            entry_type: enrichment.entry_type,
            url_source: enrichment.open_access_url,
            metadata_source: Some(MetadataSource::KeywordSearch),
            ..Default::default()
        }
    }
}

fn precedence(op: &str) -> Option<u8> {
    match op {
        "NOT" => Some(3),
        "AND" => Some(2),
        "OR" => Some(1),
        _ => None,
    }
}

fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in query.chars() {
        match c {
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    // Uppercase recognized operators so `and`/`And` behave as operators.
    tokens
        .into_iter()
        .map(|t| {
            let upper = t.to_uppercase();
            if precedence(&upper).is_some() { upper } else { t }
        })
        .collect()
}

fn is_term(tok: &str) -> bool {
    precedence(tok).is_none() && tok != "(" && tok != ")"
}

/// Insert implicit ANDs between adjacent terms (`deep learning` →
/// `deep AND learning`).
fn insert_implicit_and(tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len() * 2);
    for tok in tokens {
        if let Some(prev) = out.last() {
            let prev_ends_operand = is_term(prev) || prev == ")";
            let tok_starts_operand = is_term(&tok) || tok == "(" || tok == "NOT";
            if prev_ends_operand && tok_starts_operand {
                out.push("AND".to_string());
            }
        }
        out.push(tok);
    }
    out
}

/// Validate and normalize a boolean query string.
///
/// Returns the query with explicit ANDs and uppercase operators. Rejects
/// unbalanced parentheses and dangling operators.
pub fn normalize_query(query: &str) -> Result<String, KeywordError> {
    let tokens = insert_implicit_and(tokenize(query));
    if tokens.is_empty() {
        return Err(KeywordError::Syntax("empty query".into()));
    }

    // Shunting-yard pass for validation only.
    let mut depth = 0i32;
    let mut prev: Option<&str> = None;
    for tok in &tokens {
        match tok.as_str() {
            "(" => depth += 1,
            ")" => {
                depth -= 1;
                if depth < 0 {
                    return Err(KeywordError::Syntax("mismatched parentheses".into()));
                }
            }
            "AND" | "OR" => {
                let valid = prev.is_some_and(|p| is_term(p) || p == ")");
                if !valid {
                    return Err(KeywordError::Syntax(format!("dangling operator {tok}")));
                }
            }
            _ => {}
        }
        prev = Some(tok);
    }
    if depth != 0 {
        return Err(KeywordError::Syntax("mismatched parentheses".into()));
    }
    if let Some(last) = tokens.last()
        && precedence(last).is_some()
    {
        return Err(KeywordError::Syntax(format!("query ends with operator {last}")));
    }

    Ok(tokens.join(" "))
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub year_from: Option<i64>,
    pub year_to: Option<i64>,
}

pub struct KeywordSearcher {
    client: reqwest::Client,
    limiter: Arc<ServiceRateLimiter>,
    mailto: Option<String>,
    timeout: Duration,
}

impl KeywordSearcher {
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<ServiceRateLimiter>,
        mailto: Option<String>,
    ) -> Self {
        Self {
            client,
            limiter,
            mailto,
            timeout: Duration::from_secs(30),
        }
    }

    /// Run a keyword search, paginating with cursors until `max_results`
    /// hits are collected or the result set runs dry.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, KeywordError> {
        let normalized = normalize_query(query)?;

        let mut filter_clauses = Vec::new();
        if let Some(from) = filters.year_from {
            filter_clauses.push(format!("publication_year:>={from}"));
        }
        if let Some(to) = filters.year_to {
            filter_clauses.push(format!("publication_year:<={to}"));
        }

        let mut hits: Vec<SearchHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = "*".to_string();

        loop {
            let mut url = format!(
                "{OPENALEX_WORKS}?search={}&select={WORK_SELECT}&per-page=200&cursor={}",
                urlencoding::encode(&normalized),
                urlencoding::encode(&cursor)
            );
            if !filter_clauses.is_empty() {
                url.push_str(&format!(
                    "&filter={}",
                    urlencoding::encode(&filter_clauses.join(","))
                ));
            }
            if let Some(mailto) = &self.mailto {
                url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
            }

            let page: WorksPage = get_json(
                &self.client,
                &self.limiter,
                "openalex",
                &url,
                self.timeout,
                self.mailto.as_deref(),
            )
            .await
            .map_err(|e| match e {
                FetchFailure::Quota => KeywordError::QuotaExhausted,
                FetchFailure::Other(msg) => KeywordError::Request(msg),
            })?;

            for work in page.results {
                let Some(id) = work.id.clone() else { continue };
                if !seen.insert(id) {
                    continue;
                }
                hits.push(SearchHit::from_work(work));
                if hits.len() >= max_results {
                    return Ok(hits);
                }
            }

            match page.meta.and_then(|m| m.next_cursor) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_and_between_terms() {
        assert_eq!(normalize_query("deep learning").unwrap(), "deep AND learning");
    }

    #[test]
    fn operators_uppercased() {
        assert_eq!(
            normalize_query("cats and (dogs or birds)").unwrap(),
            "cats AND ( dogs OR birds )"
        );
    }

    #[test]
    fn not_binds_to_following_term() {
        assert_eq!(
            normalize_query("privacy not advertising").unwrap(),
            "privacy AND NOT advertising"
        );
    }

    #[test]
    fn unbalanced_parens_rejected() {
        assert!(normalize_query("(cats AND dogs").is_err());
        assert!(normalize_query("cats) AND dogs").is_err());
    }

    #[test]
    fn dangling_operator_rejected() {
        assert!(normalize_query("AND cats").is_err());
        assert!(normalize_query("cats AND").is_err());
    }

    #[test]
    fn empty_query_rejected() {
        assert!(normalize_query("   ").is_err());
    }

    #[test]
    fn hit_converts_to_seed_record() {
        let work: OpenAlexWork = serde_json::from_value(serde_json::json!({
            "id": "https://openalex.org/W42",
            "doi": "https://doi.org/10.1/x",
            "display_name": "Found by Search",
            "publication_year": 2022,
            "authorships": [{"author": {"display_name": "Ada Lovelace"}}]
        }))
        .unwrap();
        let hit = SearchHit::from_work(work);
        assert_eq!(hit.openalex_id.as_deref(), Some("W42"));

        let record = hit.into_record();
        assert_eq!(record.title.as_deref(), Some("Found by Search"));
        assert_eq!(record.openalex_id.as_deref(), Some("W42"));
        assert_eq!(record.metadata_source, Some(MetadataSource::KeywordSearch));
        assert_eq!(record.authors, vec!["Ada Lovelace"]);
    }
}
