use serde::{Deserialize, Serialize};

/// Where a reference's metadata originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    BibtexImport,
    PdfExtraction,
    OpenalexApi,
    CrossrefApi,
    KeywordSearch,
    ManualJson,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataSource::BibtexImport => "bibtex_import",
            MetadataSource::PdfExtraction => "pdf_extraction",
            MetadataSource::OpenalexApi => "openalex_api",
            MetadataSource::CrossrefApi => "crossref_api",
            MetadataSource::KeywordSearch => "keyword_search",
            MetadataSource::ManualJson => "manual_json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bibtex_import" => Some(MetadataSource::BibtexImport),
            "pdf_extraction" => Some(MetadataSource::PdfExtraction),
            "openalex_api" => Some(MetadataSource::OpenalexApi),
            "crossref_api" => Some(MetadataSource::CrossrefApi),
            "keyword_search" => Some(MetadataSource::KeywordSearch),
            "manual_json" => Some(MetadataSource::ManualJson),
            _ => None,
        }
    }
}

/// One of the seven tables a reference can occupy. A reference is a row in
/// exactly one of these at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    NoMetadata,
    WithMetadata,
    ToDownload,
    Downloaded,
    FailedEnrichment,
    FailedDownload,
    Duplicate,
}

impl Stage {
    /// SQL table backing this stage.
    pub fn table_name(&self) -> &'static str {
        match self {
            Stage::NoMetadata => "no_metadata",
            Stage::WithMetadata => "with_metadata",
            Stage::ToDownload => "to_download_references",
            Stage::Downloaded => "downloaded_references",
            Stage::FailedEnrichment => "failed_enrichments",
            Stage::FailedDownload => "failed_downloads",
            Stage::Duplicate => "duplicate_references",
        }
    }

    /// Stages that hold in-flight (non-terminal) references.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Stage::NoMetadata | Stage::WithMetadata | Stage::ToDownload
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// The unit moved through the pipeline. Optional fields stay `None` until a
/// stage fills them; the normalized shadow fields are computed by the store
/// on insert and never set by callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: Option<i64>,
    pub bibtex_key: Option<String>,
    pub entry_type: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub pmid: Option<String>,
    pub arxiv_id: Option<String>,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    /// Journal or conference / container title.
    pub container: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub url_source: Option<String>,
    pub file_path: Option<String>,
    pub checksum_pdf: Option<String>,
    pub metadata_source: Option<MetadataSource>,
    /// Original parsed entry, opaque to the pipeline.
    pub bibtex_entry_json: Option<serde_json::Value>,
    pub status_notes: Option<String>,
    pub source_pdf: Option<String>,
    pub date_added: Option<String>,
    pub date_processed: Option<String>,
    pub normalized_doi: Option<String>,
    pub normalized_title: Option<String>,
    pub normalized_authors: Option<String>,
}

impl ReferenceRecord {
    /// Minimal seed record: a title plus whatever identifiers are known.
    pub fn seed(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// Editors parsed out of the original BibTeX entry, if any. Used by the
    /// matcher's editor branch; not a first-class column.
    pub fn editors(&self) -> Vec<String> {
        self.bibtex_entry_json
            .as_ref()
            .and_then(|v| v.get("editor").or_else(|| v.get("editors")))
            .map(|v| match v {
                serde_json::Value::String(s) => vec![s.clone()],
                serde_json::Value::Array(arr) => arr
                    .iter()
                    .filter_map(|e| e.as_str().map(String::from))
                    .collect(),
                _ => vec![],
            })
            .unwrap_or_default()
    }
}

/// A related work discovered while enriching (a referenced work or a citing
/// work), kept as opaque OpenAlex identifiers plus display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedWork {
    pub openalex_id: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub work_type: Option<String>,
}

/// Authoritative metadata chosen by the matcher for one reference.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    pub container: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub entry_type: Option<String>,
    /// URL of a potentially open copy, if the record advertises one.
    pub open_access_url: Option<String>,
    /// Which cascade step first produced the accepted candidate.
    pub first_found_in_step: u8,
    pub referenced_works: Vec<RelatedWork>,
    pub citing_works: Vec<RelatedWork>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_table_names() {
        assert_eq!(Stage::NoMetadata.table_name(), "no_metadata");
        assert_eq!(Stage::Downloaded.table_name(), "downloaded_references");
        assert!(Stage::ToDownload.is_live());
        assert!(!Stage::FailedDownload.is_live());
    }

    #[test]
    fn metadata_source_round_trip() {
        for src in [
            MetadataSource::BibtexImport,
            MetadataSource::OpenalexApi,
            MetadataSource::KeywordSearch,
        ] {
            assert_eq!(MetadataSource::parse(src.as_str()), Some(src));
        }
        assert_eq!(MetadataSource::parse("grobid"), None);
    }

    #[test]
    fn editors_from_bibtex_json() {
        let mut rec = ReferenceRecord::seed("Handbook of Something");
        rec.bibtex_entry_json = Some(serde_json::json!({
            "editor": ["Smith, Jane", "Doe, John"],
        }));
        assert_eq!(rec.editors(), vec!["Smith, Jane", "Doe, John"]);

        rec.bibtex_entry_json = Some(serde_json::json!({"editor": "Solo, Han"}));
        assert_eq!(rec.editors(), vec!["Solo, Han"]);

        rec.bibtex_entry_json = None;
        assert!(rec.editors().is_empty());
    }
}
