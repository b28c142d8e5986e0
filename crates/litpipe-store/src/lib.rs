//! SQLite-backed staged storage for the literature pipeline.
//!
//! A reference lives in exactly one of seven tables; every transition is a
//! single transaction that deletes from the source and inserts into the
//! destination, so a crash never leaves a row in two stages (or none).
//! Duplicate detection guards every insertion and every queue move, and
//! each dedupe decision lands in the append-only merge log.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use thiserror::Error;

use litpipe_core::normalize::{
    normalize_authors, normalize_doi, normalize_openalex_id, normalize_title_compact,
};
use litpipe_core::record::{Enrichment, ReferenceRecord, RelatedWork, Stage};

mod rows;
mod schema;

pub use schema::init_schema;

use rows::{column_list, placeholder_list, record_from_row, record_values};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("no row with id {id} in {table}")]
    NotFound { table: &'static str, id: i64 },
}

/// Which identity field a duplicate collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedField {
    Doi,
    OpenalexId,
    TitleAuthors,
}

impl MatchedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedField::Doi => "doi",
            MatchedField::OpenalexId => "openalex_id",
            MatchedField::TitleAuthors => "title_authors",
        }
    }
}

/// An already-present row that an incoming reference matched.
#[derive(Debug, Clone)]
pub struct ExistingEntry {
    pub table: String,
    pub id: i64,
    pub matched_field: MatchedField,
}

/// Result of seeding a reference into the pipeline.
#[derive(Debug)]
pub enum SeedOutcome {
    Inserted(i64),
    /// Recorded in `duplicate_references`; nothing entered a live stage.
    Duplicate(ExistingEntry),
    /// Refused outright (e.g. missing title). Nothing was written.
    Rejected(&'static str),
}

/// Result of a stage move that re-checks for duplicates.
#[derive(Debug)]
pub enum MoveOutcome {
    Moved(i64),
    /// The row went to `duplicate_references` instead of the destination.
    Duplicate(ExistingEntry),
}

/// One merge-log row.
#[derive(Debug, Clone)]
pub struct MergeLogEntry {
    pub id: i64,
    pub canonical_table: String,
    pub canonical_id: i64,
    pub duplicate_table: String,
    pub duplicate_id: i64,
    pub action: String,
    pub match_field: String,
    pub notes: Option<String>,
    pub created_at: String,
}

/// A deduplicated keyword-search hit to persist under a search run.
#[derive(Debug, Clone)]
pub struct SearchResultRow {
    pub openalex_id: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub authors: Vec<String>,
    pub payload_json: Option<String>,
}

/// The single handle to the literature database. Shared across workers as
/// `Arc<Mutex<LiteratureStore>>`; SQLite's single-writer discipline plus
/// short transactions keep contention harmless.
pub struct LiteratureStore {
    conn: Connection,
}

fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl LiteratureStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Fill the normalized shadow fields and stamp `date_added`.
    fn prepare(record: &mut ReferenceRecord) {
        record.normalized_doi = record.doi.as_deref().and_then(normalize_doi);
        record.normalized_title = record
            .title
            .as_deref()
            .map(normalize_title_compact)
            .filter(|t| !t.is_empty());
        record.normalized_authors = normalize_authors(&record.authors);
        if record.date_added.is_none() {
            record.date_added = Some(now_utc());
        }
    }

    fn insert_record(conn: &Connection, table: &str, record: &ReferenceRecord) -> rusqlite::Result<i64> {
        conn.execute(
            &format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                column_list(),
                placeholder_list()
            ),
            params_from_iter(record_values(record)),
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn load_record(&self, table: &str, id: i64) -> Result<Option<ReferenceRecord>, StoreError> {
        let sql = format!("SELECT id, {} FROM {table} WHERE id = ?1", column_list());
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![id], record_from_row).optional()?)
    }

    /// Load one row or error if it has gone missing.
    pub fn get_record(&self, stage: Stage, id: i64) -> Result<ReferenceRecord, StoreError> {
        self.load_record(stage.table_name(), id)?
            .ok_or(StoreError::NotFound {
                table: stage.table_name(),
                id,
            })
    }

    /// Fetch up to `limit` rows of a stage, oldest ids first.
    pub fn fetch_batch(&self, stage: Stage, limit: usize) -> Result<Vec<ReferenceRecord>, StoreError> {
        let sql = format!(
            "SELECT id, {} FROM {} ORDER BY id ASC LIMIT ?1",
            column_list(),
            stage.table_name()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Duplicate detection ────────────────────────────────────────────

    /// Look for an existing row matching the given identifiers.
    ///
    /// Checks run in identity-confidence order: normalized DOI across all
    /// live stages and the downloaded archive, then normalized OpenAlex ID
    /// across the same, then title+authors within staged tables only (the
    /// archive is excluded there so a completed work is never re-flagged
    /// off its noisy extracted title). Pass `title_authors = None` to skip
    /// the noisy check entirely, as seed ingestion does.
    pub fn check_if_exists(
        &self,
        doi: Option<&str>,
        openalex_id: Option<&str>,
        title_authors: Option<(&str, &[String])>,
        exclude: Option<(&str, i64)>,
    ) -> Result<Option<ExistingEntry>, StoreError> {
        // First id in a table that is not the excluded row itself.
        let first_match = |table: &str, sql: &str, binds: &[&dyn rusqlite::ToSql]| {
            let mut stmt = self.conn.prepare_cached(sql)?;
            let ids = stmt
                .query_map(binds, |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok::<Option<i64>, rusqlite::Error>(
                ids.into_iter().find(|id| exclude != Some((table, *id))),
            )
        };

        if let Some(norm_doi) = doi.and_then(normalize_doi) {
            for table in schema::IDENTIFIER_SCAN_TABLES.iter().copied() {
                let sql = format!("SELECT id FROM {table} WHERE normalized_doi = ?1");
                if let Some(id) = first_match(table, &sql, params![norm_doi])? {
                    return Ok(Some(ExistingEntry {
                        table: table.to_string(),
                        id,
                        matched_field: MatchedField::Doi,
                    }));
                }
            }
        }

        if let Some(norm_oa) = openalex_id.and_then(normalize_openalex_id) {
            for table in schema::IDENTIFIER_SCAN_TABLES.iter().copied() {
                let sql = format!("SELECT id FROM {table} WHERE openalex_id = ?1");
                if let Some(id) = first_match(table, &sql, params![norm_oa])? {
                    return Ok(Some(ExistingEntry {
                        table: table.to_string(),
                        id,
                        matched_field: MatchedField::OpenalexId,
                    }));
                }
            }
        }

        if let Some((title, authors)) = title_authors {
            let norm_title = normalize_title_compact(title);
            if let (false, Some(norm_authors)) = (norm_title.is_empty(), normalize_authors(authors))
            {
                for table in schema::LIVE_TABLES.iter().copied() {
                    let sql = format!(
                        "SELECT id FROM {table}
                         WHERE normalized_title = ?1 AND normalized_authors = ?2"
                    );
                    if let Some(id) = first_match(table, &sql, params![norm_title, norm_authors])? {
                        return Ok(Some(ExistingEntry {
                            table: table.to_string(),
                            id,
                            matched_field: MatchedField::TitleAuthors,
                        }));
                    }
                }
            }
        }

        Ok(None)
    }

    fn write_merge_log(
        conn: &Connection,
        canonical: (&str, i64),
        duplicate: (&str, i64),
        action: &str,
        match_field: &str,
        notes: Option<&str>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO merge_log
                 (canonical_table, canonical_id, duplicate_table, duplicate_id,
                  action, match_field, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![canonical.0, canonical.1, duplicate.0, duplicate.1, action, match_field, notes],
        )?;
        Ok(())
    }

    /// Insert the payload into `duplicate_references` and append the merge
    /// log row, inside the caller's transaction.
    fn insert_duplicate_row(
        tx: &Connection,
        record: &ReferenceRecord,
        existing: &ExistingEntry,
    ) -> rusqlite::Result<i64> {
        tx.execute(
            &format!(
                "INSERT INTO duplicate_references
                     ({}, existing_entry_id, existing_entry_table, matched_on_field)
                 VALUES ({}, ?29, ?30, ?31)",
                column_list(),
                placeholder_list()
            ),
            params_from_iter(record_values(record).into_iter().chain([
                rusqlite::types::Value::Integer(existing.id),
                rusqlite::types::Value::Text(existing.table.clone()),
                rusqlite::types::Value::Text(existing.matched_field.as_str().to_string()),
            ])),
        )?;
        let dup_id = tx.last_insert_rowid();
        Self::write_merge_log(
            tx,
            (&existing.table, existing.id),
            ("duplicate_references", dup_id),
            "possible_duplicate",
            existing.matched_field.as_str(),
            None,
        )?;
        tracing::debug!(
            duplicate_id = dup_id,
            existing_table = %existing.table,
            existing_id = existing.id,
            matched = existing.matched_field.as_str(),
            "duplicate recorded"
        );
        Ok(dup_id)
    }

    /// Capture an incoming payload that collided with an existing row.
    /// Appends to `duplicate_references` and the merge log.
    pub fn record_duplicate(
        &self,
        record: &ReferenceRecord,
        existing: &ExistingEntry,
    ) -> Result<i64, StoreError> {
        let mut record = record.clone();
        Self::prepare(&mut record);

        let tx = self.conn.unchecked_transaction()?;
        let dup_id = Self::insert_duplicate_row(&tx, &record, existing)?;
        tx.commit()?;
        Ok(dup_id)
    }

    /// Single-transaction variant for rows already in a stage: the payload
    /// lands in `duplicate_references`, the merge log gets its row, and the
    /// source row is deleted, atomically.
    fn move_to_duplicates(
        &self,
        from: Stage,
        id: i64,
        record: &ReferenceRecord,
        existing: &ExistingEntry,
    ) -> Result<i64, StoreError> {
        let mut record = record.clone();
        Self::prepare(&mut record);

        let tx = self.conn.unchecked_transaction()?;
        let dup_id = Self::insert_duplicate_row(&tx, &record, existing)?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", from.table_name()),
            params![id],
        )?;
        tx.commit()?;
        Ok(dup_id)
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    /// Seed a reference into a stage, normally `no_metadata`.
    ///
    /// Identifier dedupe always runs; the noisy title+authors check runs
    /// only when seeding straight into the downloaded archive (BibTeX
    /// import), where titles are trustworthy.
    pub fn insert_seed(
        &self,
        record: &ReferenceRecord,
        stage: Stage,
    ) -> Result<SeedOutcome, StoreError> {
        let Some(title) = record.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
        else {
            return Ok(SeedOutcome::Rejected("missing_title"));
        };

        let title_authors = if stage == Stage::Downloaded {
            Some((title, record.authors.as_slice()))
        } else {
            None
        };
        if let Some(existing) = self.check_if_exists(
            record.doi.as_deref(),
            record.openalex_id.as_deref(),
            title_authors,
            None,
        )? {
            self.record_duplicate(record, &existing)?;
            return Ok(SeedOutcome::Duplicate(existing));
        }

        let mut record = record.clone();
        record.openalex_id = record.openalex_id.as_deref().and_then(normalize_openalex_id);
        Self::prepare(&mut record);

        match Self::insert_record(&self.conn, stage.table_name(), &record) {
            Ok(id) => Ok(SeedOutcome::Inserted(id)),
            // A concurrent insert of the same identity lands here; treat it
            // as a successful duplicate detection, not an error.
            Err(e) if is_constraint_violation(&e) => {
                match self.check_if_exists(record.doi.as_deref(), record.openalex_id.as_deref(), None, None)? {
                    Some(existing) => {
                        self.record_duplicate(&record, &existing)?;
                        Ok(SeedOutcome::Duplicate(existing))
                    }
                    None => Err(StoreError::Sql(e)),
                }
            }
            Err(e) => Err(StoreError::Sql(e)),
        }
    }

    // ── Stage transitions ──────────────────────────────────────────────

    /// Atomically move a row between stages, optionally filling fields that
    /// are missing in the payload from a canonical row (`merge_with`), in
    /// which case a `merged` merge-log entry is written.
    pub fn promote(
        &self,
        id: i64,
        from: Stage,
        to: Stage,
        merge_with: Option<(&str, i64)>,
    ) -> Result<i64, StoreError> {
        let mut record = self.get_record(from, id)?;

        if let Some((canonical_table, canonical_id)) = merge_with
            && let Some(canonical) = self.load_record(canonical_table, canonical_id)?
        {
            fill_missing(&mut record, &canonical);
        }
        Self::prepare(&mut record);

        let tx = self.conn.unchecked_transaction()?;
        let new_id = Self::insert_record(&tx, to.table_name(), &record)?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", from.table_name()),
            params![id],
        )?;
        if let Some((canonical_table, canonical_id)) = merge_with {
            Self::write_merge_log(
                &tx,
                (canonical_table, canonical_id),
                (to.table_name(), new_id),
                "merged",
                "doi",
                Some("fields filled from canonical row"),
            )?;
        }
        tx.commit()?;
        Ok(new_id)
    }

    /// Overlay an enrichment onto a `no_metadata` row and move it to
    /// `with_metadata`. A constraint hit (the enriched identity already
    /// exists) turns into the duplicate path.
    pub fn promote_enriched(
        &self,
        id: i64,
        enrichment: &Enrichment,
    ) -> Result<MoveOutcome, StoreError> {
        let base = self.get_record(Stage::NoMetadata, id)?;
        let mut merged = apply_enrichment(&base, enrichment);
        Self::prepare(&mut merged);

        let tx = self.conn.unchecked_transaction()?;
        let inserted = Self::insert_record(&tx, Stage::WithMetadata.table_name(), &merged);
        match inserted {
            Ok(new_id) => {
                tx.execute("DELETE FROM no_metadata WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(MoveOutcome::Moved(new_id))
            }
            Err(e) if is_constraint_violation(&e) => {
                drop(tx);
                let existing = self
                    .check_if_exists(
                        merged.doi.as_deref(),
                        merged.openalex_id.as_deref(),
                        None,
                        Some((Stage::NoMetadata.table_name(), id)),
                    )?
                    .ok_or(StoreError::Sql(e))?;
                self.move_to_duplicates(Stage::NoMetadata, id, &merged, &existing)?;
                Ok(MoveOutcome::Duplicate(existing))
            }
            Err(e) => Err(StoreError::Sql(e)),
        }
    }

    /// Move a `with_metadata` row into the download queue after a fresh
    /// duplicate check against the whole database (the world may have
    /// changed since enrichment).
    pub fn queue_for_download(&self, id: i64) -> Result<MoveOutcome, StoreError> {
        let record = self.get_record(Stage::WithMetadata, id)?;

        let title = record.title.clone().unwrap_or_default();
        if let Some(existing) = self.check_if_exists(
            record.doi.as_deref(),
            record.openalex_id.as_deref(),
            Some((&title, record.authors.as_slice())),
            Some((Stage::WithMetadata.table_name(), id)),
        )? {
            self.move_to_duplicates(Stage::WithMetadata, id, &record, &existing)?;
            return Ok(MoveOutcome::Duplicate(existing));
        }

        match self.promote(id, Stage::WithMetadata, Stage::ToDownload, None) {
            Ok(new_id) => Ok(MoveOutcome::Moved(new_id)),
            Err(StoreError::Sql(e)) if is_constraint_violation(&e) => {
                let existing = self
                    .check_if_exists(
                        record.doi.as_deref(),
                        record.openalex_id.as_deref(),
                        None,
                        Some((Stage::WithMetadata.table_name(), id)),
                    )?
                    .ok_or(StoreError::Sql(e))?;
                self.move_to_duplicates(Stage::WithMetadata, id, &record, &existing)?;
                Ok(MoveOutcome::Duplicate(existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Move a queue row into `downloaded_references` with its file path,
    /// checksum and winning source.
    pub fn complete_download(
        &self,
        id: i64,
        file_path: &str,
        checksum: &str,
        source_tag: &str,
    ) -> Result<i64, StoreError> {
        let mut record = self.get_record(Stage::ToDownload, id)?;
        record.file_path = Some(file_path.to_string());
        record.checksum_pdf = Some(checksum.to_string());
        record.url_source = Some(source_tag.to_string());
        record.date_processed = Some(now_utc());
        Self::prepare(&mut record);

        let tx = self.conn.unchecked_transaction()?;
        let new_id = Self::insert_record(&tx, Stage::Downloaded.table_name(), &record)?;
        tx.execute(
            "DELETE FROM to_download_references WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(new_id)
    }

    /// Move a row into the failed table corresponding to its stage,
    /// preserving every column and recording the reason.
    pub fn record_failure(
        &self,
        id: i64,
        stage: Stage,
        reason: &str,
    ) -> Result<i64, StoreError> {
        let failed = match stage {
            Stage::ToDownload => Stage::FailedDownload,
            _ => Stage::FailedEnrichment,
        };
        let mut record = self.get_record(stage, id)?;
        record.status_notes = Some(if reason.is_empty() {
            "unknown_failure".to_string()
        } else {
            reason.to_string()
        });
        record.date_processed = Some(now_utc());
        Self::prepare(&mut record);

        let tx = self.conn.unchecked_transaction()?;
        let new_id = Self::insert_record(&tx, failed.table_name(), &record)?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", stage.table_name()),
            params![id],
        )?;
        tx.commit()?;
        tracing::debug!(id, from = %stage, to = %failed, reason, "reference failed");
        Ok(new_id)
    }

    fn retry_failed(&self, failed: Stage) -> Result<usize, StoreError> {
        let rows = self.fetch_batch(failed, usize::MAX >> 1)?;
        let mut moved = 0;
        for mut record in rows {
            let Some(id) = record.id else { continue };
            record.status_notes = None;
            Self::prepare(&mut record);

            let tx = self.conn.unchecked_transaction()?;
            let inserted = Self::insert_record(&tx, Stage::NoMetadata.table_name(), &record);
            match inserted {
                Ok(_) => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE id = ?1", failed.table_name()),
                        params![id],
                    )?;
                    tx.commit()?;
                    moved += 1;
                }
                // The same identity re-entered the pipeline some other way
                // since the failure; leave the failed row for inspection.
                Err(e) if is_constraint_violation(&e) => {
                    drop(tx);
                    tracing::debug!(id, "retry skipped, identity already live again");
                }
                Err(e) => return Err(StoreError::Sql(e)),
            }
        }
        Ok(moved)
    }

    /// Put every failed enrichment back into `no_metadata` for another pass.
    pub fn retry_failed_enrichments(&self) -> Result<usize, StoreError> {
        self.retry_failed(Stage::FailedEnrichment)
    }

    /// Put every failed download back into `no_metadata` for a full re-run.
    pub fn retry_failed_downloads(&self) -> Result<usize, StoreError> {
        self.retry_failed(Stage::FailedDownload)
    }

    // ── Citation graph ─────────────────────────────────────────────────

    /// Record related works as directed edges keyed by OpenAlex work IDs.
    pub fn record_citation_edges(
        &self,
        source_work_id: &str,
        related: &[RelatedWork],
        kind: &str,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO citation_edges (source_work_id, target_work_id, kind)
                 VALUES (?1, ?2, ?3)",
            )?;
            for work in related {
                if let Some(target) = normalize_openalex_id(&work.openalex_id) {
                    inserted += stmt.execute(params![source_work_id, target, kind])?;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    // ── Keyword-search runs ────────────────────────────────────────────

    pub fn record_search_run(
        &self,
        query: &str,
        normalized_query: &str,
        filters_json: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO search_runs (query, normalized_query, filters_json) VALUES (?1, ?2, ?3)",
            params![query, normalized_query, filters_json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_search_results(
        &self,
        run_id: i64,
        results: &[SearchResultRow],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO search_results
                     (run_id, openalex_id, doi, title, year, authors_json, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in results {
                stmt.execute(params![
                    run_id,
                    r.openalex_id,
                    r.doi,
                    r.title,
                    r.year,
                    serde_json::to_string(&r.authors).ok(),
                    r.payload_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(results.len())
    }

    // ── Inspection ─────────────────────────────────────────────────────

    /// Row counts of the seven stage tables, in pipeline order.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>, StoreError> {
        let mut counts = Vec::new();
        for stage in [
            Stage::NoMetadata,
            Stage::WithMetadata,
            Stage::ToDownload,
            Stage::Downloaded,
            Stage::FailedEnrichment,
            Stage::FailedDownload,
            Stage::Duplicate,
        ] {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", stage.table_name()),
                [],
                |row| row.get(0),
            )?;
            counts.push((stage.table_name(), n));
        }
        Ok(counts)
    }

    /// Read merge-log rows, newest first, optionally filtered by action.
    pub fn merge_log_entries(
        &self,
        action: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MergeLogEntry>, StoreError> {
        let sql = match action {
            Some(_) => {
                "SELECT id, canonical_table, canonical_id, duplicate_table, duplicate_id,
                        action, match_field, notes, created_at
                 FROM merge_log WHERE action = ?1 ORDER BY id DESC LIMIT ?2"
            }
            None => {
                "SELECT id, canonical_table, canonical_id, duplicate_table, duplicate_id,
                        action, match_field, notes, created_at
                 FROM merge_log WHERE ?1 IS NULL ORDER BY id DESC LIMIT ?2"
            }
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![action, limit as i64], |row| {
                Ok(MergeLogEntry {
                    id: row.get(0)?,
                    canonical_table: row.get(1)?,
                    canonical_id: row.get(2)?,
                    duplicate_table: row.get(3)?,
                    duplicate_id: row.get(4)?,
                    action: row.get(5)?,
                    match_field: row.get(6)?,
                    notes: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every row of the downloaded archive (BibTeX export).
    pub fn all_downloaded(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        self.fetch_batch(Stage::Downloaded, usize::MAX >> 1)
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Fill fields that are `None`/empty in `record` from `canonical`.
fn fill_missing(record: &mut ReferenceRecord, canonical: &ReferenceRecord) {
    macro_rules! fill {
        ($field:ident) => {
            if record.$field.is_none() {
                record.$field = canonical.$field.clone();
            }
        };
    }
    fill!(bibtex_key);
    fill!(entry_type);
    fill!(title);
    fill!(year);
    fill!(doi);
    fill!(openalex_id);
    fill!(pmid);
    fill!(arxiv_id);
    fill!(abstract_text);
    fill!(container);
    fill!(volume);
    fill!(issue);
    fill!(pages);
    fill!(publisher);
    fill!(url_source);
    fill!(file_path);
    fill!(checksum_pdf);
    fill!(bibtex_entry_json);
    if record.authors.is_empty() {
        record.authors = canonical.authors.clone();
    }
    if record.keywords.is_empty() {
        record.keywords = canonical.keywords.clone();
    }
}

/// Overlay enrichment fields onto a base record; present enrichment values
/// win, everything else carries over.
fn apply_enrichment(base: &ReferenceRecord, e: &Enrichment) -> ReferenceRecord {
    let mut merged = base.clone();
    if e.title.is_some() {
        merged.title = e.title.clone();
    }
    if !e.authors.is_empty() {
        merged.authors = e.authors.clone();
    }
    if e.year.is_some() {
        merged.year = e.year;
    }
    if e.doi.is_some() {
        merged.doi = e.doi.clone();
    }
    merged.openalex_id = e
        .openalex_id
        .as_deref()
        .and_then(normalize_openalex_id)
        .or(merged.openalex_id);
    if e.abstract_text.is_some() {
        merged.abstract_text = e.abstract_text.clone();
    }
    if !e.keywords.is_empty() {
        merged.keywords = e.keywords.clone();
    }
    if e.container.is_some() {
        merged.container = e.container.clone();
    }
    if e.volume.is_some() {
        merged.volume = e.volume.clone();
    }
    if e.issue.is_some() {
        merged.issue = e.issue.clone();
    }
    if e.pages.is_some() {
        merged.pages = e.pages.clone();
    }
    if e.publisher.is_some() {
        merged.publisher = e.publisher.clone();
    }
    if e.entry_type.is_some() {
        merged.entry_type = e.entry_type.clone();
    }
    // A known open copy becomes the direct-URL head of the download cascade.
    if e.open_access_url.is_some() {
        merged.url_source = e.open_access_url.clone();
    }
    merged
}
