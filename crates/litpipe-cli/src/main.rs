use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use litpipe_core::config_file::{self, build_rate_limiter};
use litpipe_core::rate_limit::ServiceRateLimiter;
use litpipe_core::record::Stage;
use litpipe_download::{DownloadCascade, DownloadOptions};
use litpipe_openalex::{KeywordSearcher, MatcherOptions, OpenAlexMatcher, SearchFilters};
use litpipe_pipeline::{Pipeline, download_batch, enrich_batch, queue_batch};
use litpipe_store::{LiteratureStore, SearchResultRow, SeedOutcome};

mod bibtex;
mod output;

use output::ColorMode;

/// Bibliography acquisition pipeline: enrich references, dedupe them, and
/// download the full texts into a local corpus.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the literature database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Contact address passed to OpenAlex/Crossref/Unpaywall
    #[arg(long, global = true)]
    mailto: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema (idempotent)
    InitDb,

    /// Import a BibTeX file as already-downloaded references
    ImportBib {
        /// Path to the .bib file
        bib_file: PathBuf,
    },

    /// Seed the no_metadata stage from a JSON reference list
    AddToNoMetadata {
        /// Path to a JSON array of {title, authors, doi, ...} objects
        json_file: PathBuf,

        /// PDF the references were extracted from, recorded as provenance
        #[arg(long)]
        source_pdf: Option<String>,
    },

    /// Enrich no_metadata references against OpenAlex/Crossref
    EnrichOpenalexDb {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,

        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Skip fetching referenced-work details
        #[arg(long)]
        no_fetch_references: bool,

        /// Also fetch citing works
        #[arg(long)]
        fetch_citations: bool,

        #[arg(long)]
        max_citations: Option<usize>,
    },

    /// Move enriched references into the download queue (with dedupe)
    ProcessDownloads {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },

    /// Download queued references into the corpus directory
    DownloadPdfs {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        download_dir: Option<PathBuf>,

        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Move failed enrichments back into no_metadata
    RetryFailedEnrichments,

    /// Move failed downloads back into no_metadata for a fresh pass
    RetryFailedDownloads,

    /// Search OpenAlex by boolean keyword query
    KeywordSearch {
        #[arg(long)]
        query: String,

        #[arg(long, default_value_t = 100)]
        max_results: usize,

        #[arg(long)]
        year_from: Option<i64>,

        #[arg(long)]
        year_to: Option<i64>,

        /// Also seed the deduplicated hits into no_metadata
        #[arg(long)]
        enqueue: bool,
    },

    /// Show row counts (and samples) of every stage table
    InspectTables {
        /// Only this table, with sample rows
        #[arg(long)]
        table: Option<String>,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show dedupe audit entries
    MergeLog {
        /// Filter by action (merged, conflict, possible_duplicate)
        #[arg(long)]
        action: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Export the downloaded archive as a BibTeX file
    ExportBibtex {
        /// Output .bib path
        output: PathBuf,
    },
}

fn open_store(path: &PathBuf) -> anyhow::Result<Arc<Mutex<LiteratureStore>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(Mutex::new(LiteratureStore::open(path)?)))
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn spinner(message: &str) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new_spinner();
    bar.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("static template"),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight work");
            child.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config_file::load_config();

    // Resolution order: flags > environment > config file > defaults.
    let db_path = cli
        .db_path
        .clone()
        .or_else(|| std::env::var("LITPIPE_DB").ok().map(PathBuf::from))
        .or_else(|| {
            config
                .general
                .as_ref()
                .and_then(|g| g.db_path.clone())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("data/literature.db"));
    let mailto = cli
        .mailto
        .clone()
        .or_else(|| std::env::var("LITPIPE_MAILTO").ok())
        .or_else(|| config.general.as_ref().and_then(|g| g.mailto.clone()));

    let color = ColorMode(!cli.no_color && std::io::stdout().is_terminal());
    let mut stdout: Box<dyn std::io::Write> = Box::new(std::io::stdout());

    match cli.command {
        Command::InitDb => {
            open_store(&db_path)?;
            writeln!(stdout, "database ready at {}", db_path.display())?;
        }

        Command::ImportBib { bib_file } => {
            let store = open_store(&db_path)?;
            let records = bibtex::parse_bib_file(&bib_file)?;
            let mut inserted = 0usize;
            let mut duplicates = 0usize;
            let mut rejected = 0usize;
            {
                let store = store.lock().unwrap();
                for record in &records {
                    match store.insert_seed(record, Stage::Downloaded)? {
                        SeedOutcome::Inserted(_) => inserted += 1,
                        SeedOutcome::Duplicate(_) => duplicates += 1,
                        SeedOutcome::Rejected(_) => rejected += 1,
                    }
                }
            }
            writeln!(
                stdout,
                "imported {inserted} entries ({duplicates} duplicates, {rejected} rejected) from {}",
                bib_file.display()
            )?;
        }

        Command::AddToNoMetadata {
            json_file,
            source_pdf,
        } => {
            let store = open_store(&db_path)?;
            let content = std::fs::read_to_string(&json_file)?;
            let entries: Vec<serde_json::Value> = serde_json::from_str(&content)?;

            let mut inserted = 0usize;
            let mut duplicates = 0usize;
            let mut rejected = 0usize;
            {
                let store = store.lock().unwrap();
                for entry in &entries {
                    let mut record = json_to_seed(entry);
                    if record.source_pdf.is_none() {
                        record.source_pdf = source_pdf.clone();
                    }
                    match store.insert_seed(&record, Stage::NoMetadata)? {
                        SeedOutcome::Inserted(_) => inserted += 1,
                        SeedOutcome::Duplicate(_) => duplicates += 1,
                        SeedOutcome::Rejected(reason) => {
                            tracing::warn!(reason, entry = %entry, "seed rejected");
                            rejected += 1;
                        }
                    }
                }
            }
            writeln!(
                stdout,
                "seeded {inserted} references ({duplicates} duplicates, {rejected} rejected)"
            )?;
        }

        Command::EnrichOpenalexDb {
            batch_size,
            concurrency,
            no_fetch_references,
            fetch_citations,
            max_citations,
        } => {
            let store = open_store(&db_path)?;
            let limiter = Arc::new(build_rate_limiter(&config));
            let matcher_config = config.matcher.clone().unwrap_or_default();
            let options = MatcherOptions {
                mailto: mailto.clone(),
                fetch_references: !no_fetch_references
                    && matcher_config.fetch_references.unwrap_or(true),
                fetch_citations: fetch_citations
                    || matcher_config.fetch_citations.unwrap_or(false),
                max_citations: max_citations
                    .or(matcher_config.max_citations)
                    .unwrap_or(100),
                ..Default::default()
            };
            let matcher = Arc::new(OpenAlexMatcher::new(http_client(), limiter, options));

            let pipeline = Pipeline::new(store, ctrl_c_token());
            let bar = spinner("enriching references...");
            let stats = enrich_batch(&pipeline, matcher, batch_size, concurrency).await?;
            bar.finish_and_clear();
            output::print_batch_stats(&mut stdout, "enrich", &stats, color)?;
        }

        Command::ProcessDownloads { batch_size } => {
            let store = open_store(&db_path)?;
            let pipeline = Pipeline::new(store, ctrl_c_token());
            let stats = queue_batch(&pipeline, batch_size).await?;
            output::print_batch_stats(&mut stdout, "queue", &stats, color)?;
        }

        Command::DownloadPdfs {
            limit,
            download_dir,
            concurrency,
        } => {
            let store = open_store(&db_path)?;
            let limiter = Arc::new(build_rate_limiter(&config));
            let download_config = config.download.clone().unwrap_or_default();
            let options = DownloadOptions {
                mailto: mailto.clone(),
                scihub_mirrors: download_config
                    .scihub_mirrors
                    .unwrap_or_else(|| DownloadOptions::default().scihub_mirrors),
                libgen_enabled: download_config.libgen_enabled.unwrap_or(true),
                libgen_base_url: download_config
                    .libgen_base_url
                    .unwrap_or_else(|| DownloadOptions::default().libgen_base_url),
                timeout: Duration::from_secs(download_config.timeout_secs.unwrap_or(30)),
            };
            let resolver = Arc::new(DownloadCascade::new(http_client(), limiter, options));

            let target_dir = download_dir
                .or_else(|| {
                    config
                        .general
                        .as_ref()
                        .and_then(|g| g.download_dir.clone())
                        .map(PathBuf::from)
                })
                .unwrap_or_else(|| PathBuf::from("downloads"));

            let pipeline = Pipeline::new(store, ctrl_c_token());
            let bar = spinner("downloading full texts...");
            let stats = download_batch(&pipeline, resolver, &target_dir, limit, concurrency).await?;
            bar.finish_and_clear();
            output::print_batch_stats(&mut stdout, "download", &stats, color)?;
        }

        Command::RetryFailedEnrichments => {
            let store = open_store(&db_path)?;
            let moved = store.lock().unwrap().retry_failed_enrichments()?;
            writeln!(stdout, "requeued {moved} failed enrichments")?;
        }

        Command::RetryFailedDownloads => {
            let store = open_store(&db_path)?;
            let moved = store.lock().unwrap().retry_failed_downloads()?;
            writeln!(stdout, "requeued {moved} failed downloads")?;
        }

        Command::KeywordSearch {
            query,
            max_results,
            year_from,
            year_to,
            enqueue,
        } => {
            let store = open_store(&db_path)?;
            let limiter: Arc<ServiceRateLimiter> = Arc::new(build_rate_limiter(&config));
            let searcher = KeywordSearcher::new(http_client(), limiter, mailto.clone());
            let filters = SearchFilters { year_from, year_to };

            let bar = spinner("searching OpenAlex...");
            let hits = searcher.search(&query, max_results, &filters).await?;
            bar.finish_and_clear();

            let normalized = litpipe_openalex::normalize_query(&query)?;
            let filters_json = serde_json::json!({
                "year_from": year_from,
                "year_to": year_to,
            })
            .to_string();

            let mut seeded = 0usize;
            let mut duplicates = 0usize;
            {
                let store = store.lock().unwrap();
                let run_id = store.record_search_run(&query, &normalized, Some(&filters_json))?;
                let rows: Vec<SearchResultRow> = hits
                    .iter()
                    .map(|h| SearchResultRow {
                        openalex_id: h.openalex_id.clone(),
                        doi: h.doi.clone(),
                        title: h.title.clone(),
                        year: h.year,
                        authors: h.authors.clone(),
                        payload_json: None,
                    })
                    .collect();
                store.insert_search_results(run_id, &rows)?;

                if enqueue {
                    for hit in hits.clone() {
                        match store.insert_seed(&hit.into_record(), Stage::NoMetadata)? {
                            SeedOutcome::Inserted(_) => seeded += 1,
                            SeedOutcome::Duplicate(_) => duplicates += 1,
                            SeedOutcome::Rejected(_) => {}
                        }
                    }
                }
            }

            writeln!(stdout, "{} results for: {normalized}", hits.len())?;
            for hit in hits.iter().take(20) {
                writeln!(
                    stdout,
                    "  {}  {}  ({})",
                    hit.year.map(|y| y.to_string()).unwrap_or_else(|| "----".into()),
                    hit.title.as_deref().unwrap_or("<untitled>"),
                    hit.openalex_id.as_deref().unwrap_or("-"),
                )?;
            }
            if enqueue {
                writeln!(stdout, "seeded {seeded} new references ({duplicates} duplicates)")?;
            }
        }

        Command::InspectTables { table, limit } => {
            let store = open_store(&db_path)?;
            let store = store.lock().unwrap();
            match table {
                Some(name) => {
                    let stage = stage_by_name(&name)?;
                    let records = store.fetch_batch(stage, limit)?;
                    output::print_records(&mut stdout, stage.table_name(), &records, color)?;
                }
                None => {
                    let counts = store.table_counts()?;
                    output::print_table_counts(&mut stdout, &counts, color)?;
                }
            }
        }

        Command::MergeLog { action, limit } => {
            let store = open_store(&db_path)?;
            let entries = store
                .lock()
                .unwrap()
                .merge_log_entries(action.as_deref(), limit)?;
            output::print_merge_log(&mut stdout, &entries, color)?;
        }

        Command::ExportBibtex { output } => {
            let store = open_store(&db_path)?;
            let records = store.lock().unwrap().all_downloaded()?;
            std::fs::write(&output, bibtex::format_entries(&records))?;
            writeln!(
                stdout,
                "exported {} entries to {}",
                records.len(),
                output.display()
            )?;
        }
    }

    Ok(())
}

fn stage_by_name(name: &str) -> anyhow::Result<Stage> {
    let stage = match name {
        "no_metadata" => Stage::NoMetadata,
        "with_metadata" => Stage::WithMetadata,
        "to_download_references" | "to_download" => Stage::ToDownload,
        "downloaded_references" | "downloaded" => Stage::Downloaded,
        "failed_enrichments" => Stage::FailedEnrichment,
        "failed_downloads" => Stage::FailedDownload,
        "duplicate_references" | "duplicates" => Stage::Duplicate,
        other => anyhow::bail!("unknown table: {other}"),
    };
    Ok(stage)
}

/// Build a seed record from one JSON object (API-extraction output shape).
fn json_to_seed(value: &serde_json::Value) -> litpipe_core::record::ReferenceRecord {
    use litpipe_core::record::{MetadataSource, ReferenceRecord};

    let string = |key: &str| value.get(key).and_then(|v| v.as_str()).map(String::from);
    let authors = match value.get("authors") {
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .filter_map(|a| a.as_str().map(String::from))
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        _ => vec![],
    };

    ReferenceRecord {
        title: string("title"),
        authors,
        year: value.get("year").and_then(|v| v.as_i64()),
        doi: string("doi"),
        container: string("container").or_else(|| string("journal")),
        source_pdf: string("source_pdf"),
        metadata_source: Some(MetadataSource::ManualJson),
        bibtex_entry_json: Some(value.clone()),
        ..Default::default()
    }
}
