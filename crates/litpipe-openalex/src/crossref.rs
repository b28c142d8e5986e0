//! Crossref results converted into the OpenAlex work shape.
//!
//! Step 8 of the cascade queries Crossref; its rows enter the candidate
//! pool keyed `crossref:<doi>` so the selection logic treats every source
//! uniformly. Accepted Crossref DOIs are later fed back through the DOI
//! lookup to promote them to real OpenAlex records.

use serde::Deserialize;

use crate::work::{Authorship, AuthorRef, Location, OpenAlexWork, SourceRef};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefResponse {
    pub message: CrossrefMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefMessage {
    #[serde(default)]
    pub items: Vec<CrossrefItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefItem {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(rename = "published-print")]
    pub published_print: Option<CrossrefDate>,
    #[serde(rename = "published-online")]
    pub published_online: Option<CrossrefDate>,
    pub published: Option<CrossrefDate>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<i64>>,
}

impl CrossrefDate {
    fn year(&self) -> Option<i64> {
        self.date_parts.first().and_then(|parts| parts.first()).copied()
    }
}

impl CrossrefItem {
    fn year(&self) -> Option<i64> {
        self.published_print
            .as_ref()
            .and_then(CrossrefDate::year)
            .or_else(|| self.published_online.as_ref().and_then(CrossrefDate::year))
            .or_else(|| self.published.as_ref().and_then(CrossrefDate::year))
    }

    fn author_display_name(author: &CrossrefAuthor) -> Option<String> {
        let name = format!(
            "{} {}",
            author.given.as_deref().unwrap_or(""),
            author.family.as_deref().unwrap_or("")
        )
        .trim()
        .to_string();
        if name.is_empty() { None } else { Some(name) }
    }

    /// Convert into the shared candidate shape. Rows without a DOI are
    /// dropped: they cannot be pool-keyed or re-promoted.
    pub fn into_work(self) -> Option<OpenAlexWork> {
        let doi = self.doi.clone()?;
        let authorships = self
            .author
            .iter()
            .filter_map(Self::author_display_name)
            .map(|name| Authorship {
                author: Some(AuthorRef {
                    display_name: Some(name),
                }),
            })
            .collect();
        let container = self.container_title.first().cloned();

        Some(OpenAlexWork {
            id: Some(format!("crossref:{doi}")),
            doi: Some(doi),
            display_name: self.title.first().cloned(),
            authorships,
            publication_year: self.year(),
            work_type: self.work_type,
            primary_location: container.map(|name| Location {
                source: Some(SourceRef {
                    display_name: Some(name),
                    publisher: None,
                }),
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> CrossrefItem {
        serde_json::from_value(serde_json::json!({
            "DOI": "10.1038/nature14539",
            "title": ["Deep learning"],
            "author": [
                {"given": "Yann", "family": "LeCun"},
                {"given": "Yoshua", "family": "Bengio"},
                {"family": "Hinton"}
            ],
            "published-print": {"date-parts": [[2015, 5, 28]]},
            "type": "journal-article",
            "container-title": ["Nature"]
        }))
        .unwrap()
    }

    #[test]
    fn maps_into_work_shape() {
        let work = sample_item().into_work().unwrap();
        assert_eq!(work.id.as_deref(), Some("crossref:10.1038/nature14539"));
        assert!(work.is_crossref());
        assert_eq!(work.display_name.as_deref(), Some("Deep learning"));
        assert_eq!(
            work.author_names(),
            vec!["Yann LeCun", "Yoshua Bengio", "Hinton"]
        );
        assert_eq!(work.publication_year, Some(2015));
        assert_eq!(
            work.primary_location
                .as_ref()
                .and_then(|l| l.source.as_ref())
                .and_then(|s| s.display_name.as_deref()),
            Some("Nature")
        );
    }

    #[test]
    fn year_prefers_print_then_online() {
        let item: CrossrefItem = serde_json::from_value(serde_json::json!({
            "DOI": "10.1/x",
            "published-online": {"date-parts": [[2020]]},
            "published": {"date-parts": [[2021]]}
        }))
        .unwrap();
        assert_eq!(item.year(), Some(2020));
    }

    #[test]
    fn doiless_item_dropped() {
        let item: CrossrefItem =
            serde_json::from_value(serde_json::json!({"title": ["No DOI here"]})).unwrap();
        assert!(item.into_work().is_none());
    }

    #[test]
    fn empty_response_parses() {
        let resp: CrossrefResponse = serde_json::from_str(r#"{"message":{}}"#).unwrap();
        assert!(resp.message.items.is_empty());
    }
}
