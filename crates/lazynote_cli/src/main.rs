//! Command-line front end for the note importer.
//!
//! # Responsibility
//! - Parse flags, load config, wire the importer's collaborators.
//! - Print progress from the event channel and a short run summary.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lazynote_import::{
    default_log_level, init_logging, run_import, scan_source, DestinationStore, HttpFetcher,
    ImportConfig, ImportOptions, ImportServices, JsonSnapshotDecoder, ProgressEvent, SourceKind,
    SourceSummary, SqliteDestination, UpdateLogDecoder,
};
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use std::thread;

#[derive(Parser)]
#[command(name = "lazynote-import", version, about = "Import notes into a LazyNote store")]
struct Cli {
    /// Directory for rolling log files (absolute)
    #[arg(long, global = true, env = "LAZYNOTE_LOG_DIR")]
    log_dir: Option<PathBuf>,
    /// trace|debug|info|warn|error
    #[arg(long, global = true, env = "LAZYNOTE_LOG_LEVEL")]
    log_level: Option<String>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a source and print its summary
    Scan {
        root: PathBuf,
        #[arg(long, value_parser = parse_kind)]
        kind: SourceKind,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a source into a destination store
    Import(ImportArgs),
    /// Put a destination back to the state saved by an earlier import
    Restore {
        #[arg(long, env = "LAZYNOTE_DEST")]
        dest: PathBuf,
        /// Run directory printed by `import`
        #[arg(long)]
        backup_dir: PathBuf,
    },
    /// Full-text search over an imported store
    Search {
        query: String,
        #[arg(long, env = "LAZYNOTE_DEST")]
        dest: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Args)]
struct ImportArgs {
    root: PathBuf,
    #[arg(long, value_parser = parse_kind)]
    kind: SourceKind,
    /// Destination SQLite file (created when missing)
    #[arg(long, env = "LAZYNOTE_DEST")]
    dest: PathBuf,
    /// Root of the sharded asset tree
    #[arg(long, env = "LAZYNOTE_ASSETS")]
    assets: PathBuf,
    /// Parent directory for per-run backups and reports
    #[arg(long, env = "LAZYNOTE_BACKUP_ROOT")]
    backup_root: PathBuf,
    /// TOML file with import settings
    #[arg(long, env = "LAZYNOTE_IMPORT_CONFIG")]
    config: Option<PathBuf>,
    /// Treat legacy update logs as JSON region snapshots
    #[arg(long)]
    snapshot_logs: bool,
    /// Never download remote images
    #[arg(long)]
    no_remote: bool,
    /// Override the per-note decode timeout
    #[arg(long)]
    decode_timeout_secs: Option<u64>,
}

fn parse_kind(value: &str) -> Result<SourceKind, String> {
    SourceKind::parse(value)
        .ok_or_else(|| format!("unknown kind `{value}`; expected legacy|html|markdown|text"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).context("cannot start logging")?;
    }

    match cli.cmd {
        Command::Scan { root, kind, json } => {
            let summary = scan_source(&root, kind);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(if summary.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Import(args) => import(args),
        Command::Restore { dest, backup_dir } => {
            let mut store = open_store(&dest)?;
            store
                .restore(&backup_dir)
                .with_context(|| format!("cannot restore from {}", backup_dir.display()))?;
            info!("event=cli_restore module=cli status=ok");
            println!("restored {} from {}", dest.display(), backup_dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Search { query, dest, limit } => {
            let store = open_store(&dest)?;
            for hit in store.search(&query, limit)? {
                println!("{}\t{}\t{}", hit.note_id, hit.title, hit.snippet);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn import(args: ImportArgs) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => ImportConfig::load(path)?,
        None => ImportConfig::default(),
    };
    if args.no_remote {
        config.remote_downloads = false;
    }
    if let Some(secs) = args.decode_timeout_secs {
        config.decode_timeout_secs = secs;
    }

    let decoder: Option<Arc<dyn UpdateLogDecoder>> = match args.kind {
        SourceKind::Legacy if args.snapshot_logs => Some(Arc::new(JsonSnapshotDecoder)),
        SourceKind::Legacy => bail!(
            "legacy import needs an update-log decoder; pass --snapshot-logs for JSON snapshot logs"
        ),
        _ => None,
    };
    let fetcher = HttpFetcher::new(config.download_timeout(), config.max_download_bytes)?;
    let mut store = open_store(&args.dest)?;

    let mut options = ImportOptions::new(&args.root, args.kind, &args.assets, &args.backup_root);
    options.config = config;

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            print_progress(&event);
        }
    });

    let outcome = run_import(
        &options,
        ImportServices {
            destination: &mut store,
            decoder,
            fetcher: &fetcher,
            progress: Some(tx),
        },
    );
    let _ = printer.join();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(lazynote_import::ImportError::InvalidSource(summary)) => {
            print_summary(&summary);
            bail!("source rejected; nothing was written");
        }
        Err(err) => return Err(err.into()),
    };

    let report = &outcome.report;
    println!("report: {}", outcome.report_path.display());
    println!(
        "notes: {} prepared, {} decode errors, {} missing resources, {} copy errors",
        report.stats.notes_prepared,
        report.decode_errors.len(),
        report.missing_resources.len(),
        report.asset_copy_errors.len()
    );
    for error in &report.errors {
        println!("  - {error}");
    }
    if outcome.failed() {
        eprintln!(
            "import failed; restore with: lazynote-import restore --dest {} --backup-dir {}",
            args.dest.display(),
            outcome.backup_dir().display()
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn open_store(dest: &Path) -> Result<SqliteDestination> {
    SqliteDestination::open(dest)
        .with_context(|| format!("cannot open destination {}", dest.display()))
}

fn print_progress(event: &ProgressEvent) {
    let message = event.message.as_deref().unwrap_or("");
    eprintln!(
        "[{}] {} {}/{} {}",
        event.stage.as_str(),
        event.state.as_str(),
        event.current,
        event.total,
        message
    );
}

fn print_summary(summary: &SourceSummary) {
    let counts = &summary.counts;
    println!(
        "{} source at {}: {}",
        summary.kind.as_str(),
        summary.source_root.display(),
        if summary.valid { "valid" } else { "invalid" }
    );
    println!(
        "  notes={} notebooks={} stacks={} tags={} attachments={} images={} missing={}",
        counts.notes,
        counts.notebooks,
        counts.stacks,
        counts.tags,
        counts.attachments,
        counts.images,
        summary.missing_count
    );
    for error in &summary.errors {
        println!("  error: {error}");
    }
}
