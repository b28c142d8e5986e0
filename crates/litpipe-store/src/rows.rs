//! Row ↔ record mapping shared by every stage table.

use litpipe_core::record::{MetadataSource, ReferenceRecord};
use rusqlite::Row;
use rusqlite::types::Value;

use crate::schema::RECORD_COLUMNS;

/// Comma-joined column list for SELECT/INSERT statements.
pub(crate) fn column_list() -> String {
    RECORD_COLUMNS.join(", ")
}

/// `?1, ?2, …` placeholder list matching [`RECORD_COLUMNS`].
pub(crate) fn placeholder_list() -> String {
    (1..=RECORD_COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn json_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        serde_json::to_string(values).ok()
    }
}

fn parse_json_list(raw: Option<String>) -> Vec<String> {
    match raw {
        None => vec![],
        Some(s) => serde_json::from_str::<Vec<String>>(&s)
            // Legacy rows may hold a bare string rather than a JSON array.
            .unwrap_or_else(|_| vec![s]),
    }
}

fn opt(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

/// Bind values for one record, in [`RECORD_COLUMNS`] order.
pub(crate) fn record_values(rec: &ReferenceRecord) -> Vec<Value> {
    vec![
        opt(&rec.bibtex_key),
        opt(&rec.entry_type),
        opt(&rec.title),
        opt(&json_list(&rec.authors)),
        rec.year.map(Value::Integer).unwrap_or(Value::Null),
        opt(&rec.doi),
        opt(&rec.openalex_id),
        opt(&rec.pmid),
        opt(&rec.arxiv_id),
        opt(&rec.abstract_text),
        opt(&json_list(&rec.keywords)),
        opt(&rec.container),
        opt(&rec.volume),
        opt(&rec.issue),
        opt(&rec.pages),
        opt(&rec.publisher),
        opt(&rec.url_source),
        opt(&rec.file_path),
        opt(&rec.checksum_pdf),
        opt(&rec.metadata_source.map(|m| m.as_str().to_string())),
        opt(&rec
            .bibtex_entry_json
            .as_ref()
            .and_then(|v| serde_json::to_string(v).ok())),
        opt(&rec.status_notes),
        opt(&rec.source_pdf),
        opt(&rec.date_added),
        opt(&rec.date_processed),
        opt(&rec.normalized_doi),
        opt(&rec.normalized_title),
        opt(&rec.normalized_authors),
    ]
}

/// Build a record from a row shaped `SELECT id, <RECORD_COLUMNS> …`.
pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ReferenceRecord> {
    let mut idx = 0usize;
    let mut next = || {
        idx += 1;
        idx
    };

    Ok(ReferenceRecord {
        id: row.get(0)?,
        bibtex_key: row.get(next())?,
        entry_type: row.get(next())?,
        title: row.get(next())?,
        authors: parse_json_list(row.get(next())?),
        year: row.get(next())?,
        doi: row.get(next())?,
        openalex_id: row.get(next())?,
        pmid: row.get(next())?,
        arxiv_id: row.get(next())?,
        abstract_text: row.get(next())?,
        keywords: parse_json_list(row.get(next())?),
        container: row.get(next())?,
        volume: row.get(next())?,
        issue: row.get(next())?,
        pages: row.get(next())?,
        publisher: row.get(next())?,
        url_source: row.get(next())?,
        file_path: row.get(next())?,
        checksum_pdf: row.get(next())?,
        metadata_source: row
            .get::<_, Option<String>>(next())?
            .as_deref()
            .and_then(MetadataSource::parse),
        bibtex_entry_json: row
            .get::<_, Option<String>>(next())?
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        status_notes: row.get(next())?,
        source_pdf: row.get(next())?,
        date_added: row.get(next())?,
        date_processed: row.get(next())?,
        normalized_doi: row.get(next())?,
        normalized_title: row.get(next())?,
        normalized_authors: row.get(next())?,
    })
}
