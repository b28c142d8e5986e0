//! Schema creation for the literature database.
//!
//! Seven stage tables share one column layout so rows can move between
//! stages with a single column list. The `duplicate_references` table adds
//! the columns describing what an incoming row collided with.

use rusqlite::Connection;

use crate::StoreError;

/// Shared column layout of every stage table (after the `id` primary key).
pub(crate) const RECORD_COLUMNS: &[&str] = &[
    "bibtex_key",
    "entry_type",
    "title",
    "authors",
    "year",
    "doi",
    "openalex_id",
    "pmid",
    "arxiv_id",
    "abstract",
    "keywords",
    "journal_conference",
    "volume",
    "issue",
    "pages",
    "publisher",
    "url_source",
    "file_path",
    "checksum_pdf",
    "metadata_source_type",
    "bibtex_entry_json",
    "status_notes",
    "source_pdf",
    "date_added",
    "date_processed",
    "normalized_doi",
    "normalized_title",
    "normalized_authors",
];

/// Tables whose rows represent work not yet finished or archived.
pub(crate) const LIVE_TABLES: &[&str] = &["no_metadata", "with_metadata", "to_download_references"];

/// Live stages plus the downloaded archive; identifier dedupe scans all of
/// these, title+author dedupe only the staged ones.
pub(crate) const IDENTIFIER_SCAN_TABLES: &[&str] = &[
    "downloaded_references",
    "to_download_references",
    "with_metadata",
    "no_metadata",
];

fn record_columns_ddl() -> String {
    RECORD_COLUMNS
        .iter()
        .map(|c| match *c {
            "year" => "year INTEGER".to_string(),
            _ => format!("{c} TEXT"),
        })
        .collect::<Vec<_>>()
        .join(",\n    ")
}

/// Create all tables and indices. Idempotent.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let cols = record_columns_ddl();

    for table in [
        "no_metadata",
        "with_metadata",
        "to_download_references",
        "downloaded_references",
        "failed_enrichments",
        "failed_downloads",
    ] {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    {cols}
);"
        ))?;
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS duplicate_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    {cols},
    existing_entry_id INTEGER NOT NULL,
    existing_entry_table TEXT NOT NULL,
    matched_on_field TEXT NOT NULL,
    date_detected TEXT DEFAULT (datetime('now'))
);"
    ))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS merge_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_table TEXT NOT NULL,
            canonical_id INTEGER NOT NULL,
            duplicate_table TEXT NOT NULL,
            duplicate_id INTEGER NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('merged', 'conflict', 'possible_duplicate')),
            match_field TEXT NOT NULL,
            notes TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS citation_edges (
            source_work_id TEXT NOT NULL,
            target_work_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('references', 'cited_by')),
            PRIMARY KEY (source_work_id, target_work_id, kind)
        );

        CREATE TABLE IF NOT EXISTS search_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            normalized_query TEXT NOT NULL,
            filters_json TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS search_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES search_runs(id),
            openalex_id TEXT,
            doi TEXT,
            title TEXT,
            year INTEGER,
            authors_json TEXT,
            payload_json TEXT
        );
        "#,
    )?;

    // Identity indices on the four live stages. The normalized-DOI index is
    // unique so a concurrent double-insert surfaces as a constraint hit,
    // which the store maps onto the duplicate path.
    for table in [
        "no_metadata",
        "with_metadata",
        "to_download_references",
        "downloaded_references",
    ] {
        conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_norm_doi
                 ON {table}(normalized_doi) WHERE normalized_doi IS NOT NULL;
             CREATE INDEX IF NOT EXISTS idx_{table}_title_authors
                 ON {table}(normalized_title, normalized_authors);
             CREATE INDEX IF NOT EXISTS idx_{table}_openalex
                 ON {table}(openalex_id);"
        ))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM no_metadata", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn all_stage_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for table in [
            "no_metadata",
            "with_metadata",
            "to_download_references",
            "downloaded_references",
            "failed_enrichments",
            "failed_downloads",
            "duplicate_references",
            "merge_log",
            "citation_edges",
            "search_runs",
            "search_results",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "table {table}");
        }
    }

    #[test]
    fn duplicate_doi_insert_violates_unique_index() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO no_metadata (title, normalized_doi) VALUES ('a', '10.1/x')",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO no_metadata (title, normalized_doi) VALUES ('b', '10.1/x')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn null_dois_do_not_collide() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for title in ["a", "b", "c"] {
            conn.execute(
                "INSERT INTO no_metadata (title) VALUES (?1)",
                rusqlite::params![title],
            )
            .unwrap();
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM no_metadata", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
