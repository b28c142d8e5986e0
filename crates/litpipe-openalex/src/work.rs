//! Typed adapters for the OpenAlex work shape.
//!
//! Everything downstream of the HTTP layer works with these structs; the
//! core never probes raw JSON. Crossref results are converted into the same
//! shape so the candidate pool is uniform.

use std::collections::HashMap;

use serde::Deserialize;

use litpipe_core::normalize::normalize_openalex_id;
use litpipe_core::record::{Enrichment, RelatedWork};

/// Fields requested from OpenAlex on every works query.
pub const WORK_SELECT: &str = "id,doi,display_name,authorships,publication_year,referenced_works,\
abstract_inverted_index,cited_by_api_url,primary_location,biblio,open_access,type,keywords";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAlexWork {
    pub id: Option<String>,
    pub doi: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub authorships: Vec<Authorship>,
    pub publication_year: Option<i64>,
    #[serde(default)]
    pub referenced_works: Vec<String>,
    pub abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    pub cited_by_api_url: Option<String>,
    pub primary_location: Option<Location>,
    pub biblio: Option<Biblio>,
    pub open_access: Option<OpenAccess>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    #[serde(default)]
    pub keywords: Vec<KeywordTag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Authorship {
    pub author: Option<AuthorRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorRef {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    pub source: Option<SourceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRef {
    pub display_name: Option<String>,
    pub publisher: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Biblio {
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub first_page: Option<String>,
    pub last_page: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAccess {
    pub oa_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordTag {
    pub display_name: Option<String>,
}

/// One page of a works listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorksPage {
    #[serde(default)]
    pub results: Vec<OpenAlexWork>,
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMeta {
    pub count: Option<i64>,
    pub next_cursor: Option<String>,
}

impl OpenAlexWork {
    /// Ordered author display names.
    pub fn author_names(&self) -> Vec<String> {
        self.authorships
            .iter()
            .filter_map(|a| a.author.as_ref().and_then(|r| r.display_name.clone()))
            .collect()
    }

    /// Pool key: the work id for OpenAlex results, `crossref:<doi>` for
    /// converted Crossref rows (set at conversion time).
    pub fn pool_key(&self) -> Option<String> {
        self.id.clone()
    }

    pub fn is_crossref(&self) -> bool {
        self.id.as_deref().is_some_and(|id| id.starts_with("crossref:"))
    }

    /// `first_page--last_page` when both ends are present.
    pub fn pages(&self) -> Option<String> {
        let biblio = self.biblio.as_ref()?;
        match (&biblio.first_page, &biblio.last_page) {
            (Some(first), Some(last)) => Some(format!("{first}--{last}")),
            _ => None,
        }
    }

    pub fn to_related_work(&self) -> Option<RelatedWork> {
        let raw_id = self.id.as_deref()?;
        Some(RelatedWork {
            openalex_id: normalize_openalex_id(raw_id)?,
            title: self.display_name.clone(),
            authors: self.author_names(),
            year: self.publication_year,
            doi: self.doi.clone(),
            work_type: self.work_type.clone(),
        })
    }
}

/// Reassemble an abstract from OpenAlex's inverted index: each term lands at
/// each of its positions, joined with spaces. Null in, null out.
pub fn decode_abstract(inverted: Option<&HashMap<String, Vec<usize>>>) -> Option<String> {
    let inverted = inverted?;
    if inverted.is_empty() {
        return None;
    }
    let mut by_position: Vec<(usize, &str)> = inverted
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |&p| (p, word.as_str())))
        .collect();
    by_position.sort_by_key(|(p, _)| *p);
    Some(
        by_position
            .into_iter()
            .map(|(_, w)| w)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Build the enrichment payload for an accepted candidate.
pub fn build_enrichment(work: &OpenAlexWork, first_found_in_step: u8) -> Enrichment {
    let source = work
        .primary_location
        .as_ref()
        .and_then(|l| l.source.as_ref());
    Enrichment {
        title: work.display_name.clone(),
        authors: work.author_names(),
        year: work.publication_year,
        doi: work.doi.clone(),
        openalex_id: work.id.as_deref().and_then(normalize_openalex_id),
        abstract_text: decode_abstract(work.abstract_inverted_index.as_ref()),
        keywords: work
            .keywords
            .iter()
            .filter_map(|k| k.display_name.clone())
            .collect(),
        container: source.and_then(|s| s.display_name.clone()),
        volume: work.biblio.as_ref().and_then(|b| b.volume.clone()),
        issue: work.biblio.as_ref().and_then(|b| b.issue.clone()),
        pages: work.pages(),
        publisher: source.and_then(|s| s.publisher.clone()),
        entry_type: work.work_type.clone(),
        open_access_url: work.open_access.as_ref().and_then(|o| o.oa_url.clone()),
        first_found_in_step,
        referenced_works: vec![],
        citing_works: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_work() -> OpenAlexWork {
        serde_json::from_value(serde_json::json!({
            "id": "https://openalex.org/W2741809807",
            "doi": "https://doi.org/10.7717/peerj.4375",
            "display_name": "The state of OA",
            "authorships": [
                {"author": {"display_name": "Heather Piwowar"}},
                {"author": {"display_name": "Jason Priem"}},
                {"author": null}
            ],
            "publication_year": 2018,
            "referenced_works": ["https://openalex.org/W100", "https://openalex.org/W200"],
            "abstract_inverted_index": {"state": [1], "The": [0], "of": [2], "OA": [3]},
            "cited_by_api_url": "https://api.openalex.org/works?filter=cites:W2741809807",
            "primary_location": {"source": {"display_name": "PeerJ", "publisher": "PeerJ Inc."}},
            "biblio": {"volume": "6", "issue": null, "first_page": "e4375", "last_page": "e4375"},
            "open_access": {"oa_url": "https://peerj.com/articles/4375.pdf"},
            "type": "article",
            "keywords": [{"display_name": "Open access"}]
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_full_work() {
        let work = sample_work();
        assert_eq!(work.author_names(), vec!["Heather Piwowar", "Jason Priem"]);
        assert_eq!(work.publication_year, Some(2018));
        assert_eq!(work.pages(), Some("e4375--e4375".into()));
    }

    #[test]
    fn deserializes_sparse_work() {
        let work: OpenAlexWork =
            serde_json::from_value(serde_json::json!({"id": "https://openalex.org/W1"})).unwrap();
        assert!(work.author_names().is_empty());
        assert!(work.pages().is_none());
        assert!(work.abstract_inverted_index.is_none());
    }

    #[test]
    fn abstract_decode_orders_terms() {
        let work = sample_work();
        assert_eq!(
            decode_abstract(work.abstract_inverted_index.as_ref()).as_deref(),
            Some("The state of OA")
        );
    }

    #[test]
    fn abstract_decode_repeated_positions() {
        let mut idx = HashMap::new();
        idx.insert("the".to_string(), vec![0, 2]);
        idx.insert("cat".to_string(), vec![1, 3]);
        assert_eq!(decode_abstract(Some(&idx)).as_deref(), Some("the cat the cat"));
    }

    #[test]
    fn abstract_decode_null_is_null() {
        assert_eq!(decode_abstract(None), None);
        assert_eq!(decode_abstract(Some(&HashMap::new())), None);
    }

    #[test]
    fn enrichment_from_work() {
        let e = build_enrichment(&sample_work(), 2);
        assert_eq!(e.openalex_id.as_deref(), Some("W2741809807"));
        assert_eq!(e.container.as_deref(), Some("PeerJ"));
        assert_eq!(e.publisher.as_deref(), Some("PeerJ Inc."));
        assert_eq!(e.open_access_url.as_deref(), Some("https://peerj.com/articles/4375.pdf"));
        assert_eq!(e.keywords, vec!["Open access"]);
        assert_eq!(e.first_found_in_step, 2);
    }

    #[test]
    fn related_work_normalizes_id() {
        let related = sample_work().to_related_work().unwrap();
        assert_eq!(related.openalex_id, "W2741809807");
        assert_eq!(related.year, Some(2018));
    }

    #[test]
    fn works_page_defaults() {
        let page: WorksPage = serde_json::from_str("{}").unwrap();
        assert!(page.results.is_empty());
        assert!(page.meta.is_none());
    }
}
