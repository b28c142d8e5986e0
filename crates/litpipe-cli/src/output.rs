//! Terminal rendering for inspection commands.

use std::io::Write;

use owo_colors::OwoColorize;

use litpipe_core::record::ReferenceRecord;
use litpipe_pipeline::BatchStats;
use litpipe_store::MergeLogEntry;

/// Whether to colorize output (off when piped or asked).
#[derive(Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

pub fn print_batch_stats(
    w: &mut dyn Write,
    stage: &str,
    stats: &BatchStats,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(
            w,
            "{stage}: {} processed, {} promoted, {} failed, {} duplicates",
            stats.processed,
            stats.promoted.green(),
            stats.failed.red(),
            stats.skipped_duplicate.yellow(),
        )
    } else {
        writeln!(
            w,
            "{stage}: {} processed, {} promoted, {} failed, {} duplicates",
            stats.processed, stats.promoted, stats.failed, stats.skipped_duplicate,
        )
    }
}

pub fn print_table_counts(
    w: &mut dyn Write,
    counts: &[(&'static str, i64)],
    color: ColorMode,
) -> std::io::Result<()> {
    let width = counts.iter().map(|(t, _)| t.len()).max().unwrap_or(0);
    for (table, count) in counts {
        if color.enabled() && *count > 0 {
            writeln!(w, "{table:width$}  {}", count.bold())?;
        } else {
            writeln!(w, "{table:width$}  {count}")?;
        }
    }
    Ok(())
}

/// A compact one-line-per-row listing of sample records.
pub fn print_records(
    w: &mut dyn Write,
    table: &str,
    records: &[ReferenceRecord],
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}", table.bold())?;
    } else {
        writeln!(w, "{table}")?;
    }
    if records.is_empty() {
        writeln!(w, "  (empty)")?;
        return Ok(());
    }
    for rec in records {
        let id = rec.id.unwrap_or(0);
        let year = rec
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "----".into());
        let title = rec.title.as_deref().unwrap_or("<untitled>");
        let title: String = title.chars().take(70).collect();
        let ident = rec
            .normalized_doi
            .as_deref()
            .or(rec.openalex_id.as_deref())
            .unwrap_or("-");
        writeln!(w, "  [{id:>5}] {year}  {title}  ({ident})")?;
        if let Some(notes) = rec.status_notes.as_deref() {
            if color.enabled() {
                writeln!(w, "          {}", notes.red())?;
            } else {
                writeln!(w, "          {notes}")?;
            }
        }
    }
    Ok(())
}

pub fn print_merge_log(
    w: &mut dyn Write,
    entries: &[MergeLogEntry],
    color: ColorMode,
) -> std::io::Result<()> {
    if entries.is_empty() {
        writeln!(w, "merge log is empty")?;
        return Ok(());
    }
    for e in entries {
        let line = format!(
            "[{}] {} {}#{} <- {}#{} (on {})",
            e.created_at,
            e.action,
            e.canonical_table,
            e.canonical_id,
            e.duplicate_table,
            e.duplicate_id,
            e.match_field,
        );
        if color.enabled() && e.action == "conflict" {
            writeln!(w, "{}", line.red())?;
        } else {
            writeln!(w, "{line}")?;
        }
        if let Some(notes) = e.notes.as_deref() {
            writeln!(w, "    {notes}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_listing_is_plain_without_color() {
        let mut rec = ReferenceRecord::seed("A Paper");
        rec.id = Some(3);
        rec.year = Some(2020);
        rec.normalized_doi = Some("10.1/x".into());

        let mut buf = Vec::new();
        print_records(&mut buf, "no_metadata", &[rec], ColorMode(false)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("no_metadata"));
        assert!(text.contains("[    3] 2020  A Paper  (10.1/x)"));
    }

    #[test]
    fn empty_table_prints_placeholder() {
        let mut buf = Vec::new();
        print_records(&mut buf, "failed_downloads", &[], ColorMode(false)).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("(empty)"));
    }
}
