//! Import pipeline sequencing.
//!
//! # Responsibility
//! - Scan, then run `tables/enumerate`, `resources/copy`, `decode/transcode`
//!   and `write/persist` in that order.
//! - Aggregate per-item failures into the report and write it on every path
//!   past a valid scan.
//!
//! # Invariants
//! - An invalid scan returns before any backup, write or report.
//! - Existing destination data is backed up before it is replaced.
//! - Per-item failures never mark a stage `error` nor set `failed`.
//! - The asset map is owned by one run and mutated in note order.

use crate::assets::remote::{OfflineFetcher, RemoteFetcher};
use crate::assets::resolver::{
    copy_asset, infer_extension, mime_for_extension, place, resolve_resource, CopyOutcome,
    ResourceLocation, FALLBACK_EXTENSION,
};
use crate::config::ImportConfig;
use crate::db::open_source_db;
use crate::destination::DestinationStore;
use crate::digest::sha256_file;
use crate::fs_probe::{file_size, relative_slash_path};
use crate::import::package::{
    ImportPackage, PackageNote, PackageNotebook, PackageStack, PackageTag,
};
use crate::import::progress::{ProgressEvent, ProgressReporter, Stage, StageProgress};
use crate::import::report::{
    AssetCopyError, DecodeFailure, ImportReport, ImportStats, MissingResource, REPORT_FILE_NAME,
};
use crate::model::asset::{AssetMap, AssetRecord, AttachmentRecord, AttachmentStatus, TreeAssetIndex};
use crate::model::note::{DecodedNote, StructuredMeta};
use crate::model::source::{SourceKind, SourceSummary};
use crate::model::time::normalize_timestamp;
use crate::source::layout::{resolve_layout, LegacyLayout};
use crate::source::legacy::{extract_legacy, AttachmentRow, ExtractError, LegacyExtraction};
use crate::source::scan_source;
use crate::source::tree::{extract_tree, stable_id, NoteFileEntry, TreeExtraction};
use crate::transcode::crdt::{decode_with_timeout, read_update_log, UpdateLogDecoder};
use crate::transcode::enml::EnmlOptions;
use crate::transcode::links::{LinkFindings, TreeLinkContext};
use crate::transcode::{normalize_legacy, normalize_tree, NoteRefs};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

const UNTITLED: &str = "Untitled";
const SNIFF_BYTES: u64 = 8 * 1024;

/// What to import and where.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub source_root: PathBuf,
    pub kind: SourceKind,
    /// Root of the sharded asset tree.
    pub assets_root: PathBuf,
    /// Parent of the per-run backup/report directory.
    pub backup_root: PathBuf,
    pub config: ImportConfig,
}

impl ImportOptions {
    pub fn new(
        source_root: impl Into<PathBuf>,
        kind: SourceKind,
        assets_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            kind,
            assets_root: assets_root.into(),
            backup_root: backup_root.into(),
            config: ImportConfig::default(),
        }
    }
}

/// Host-supplied collaborators.
pub struct ImportServices<'a> {
    pub destination: &'a mut dyn DestinationStore,
    /// Required for legacy sources.
    pub decoder: Option<Arc<dyn UpdateLogDecoder>>,
    pub fetcher: &'a dyn RemoteFetcher,
    pub progress: Option<Sender<ProgressEvent>>,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub report: ImportReport,
    pub report_path: PathBuf,
}

impl ImportOutcome {
    pub fn failed(&self) -> bool {
        self.report.failed
    }

    /// Directory to hand to `DestinationStore::restore`.
    pub fn backup_dir(&self) -> &Path {
        &self.report.backup_dir
    }
}

#[derive(Debug)]
pub enum ImportError {
    /// The scan rejected the source; nothing was touched.
    InvalidSource(Box<SourceSummary>),
    /// Legacy sources need an update-log decoder.
    DecoderRequired,
    RunDir { path: PathBuf, source: io::Error },
    Report { path: PathBuf, source: io::Error },
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSource(summary) => write!(
                f,
                "invalid {} source at {}: {}",
                summary.kind.as_str(),
                summary.source_root.display(),
                summary.errors.join("; ")
            ),
            Self::DecoderRequired => write!(f, "legacy import requires an update-log decoder"),
            Self::RunDir { path, source } => {
                write!(f, "cannot create run directory {}: {source}", path.display())
            }
            Self::Report { path, source } => {
                write!(f, "cannot write import report {}: {source}", path.display())
            }
        }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::RunDir { source, .. } | Self::Report { source, .. } => Some(source),
            Self::InvalidSource(_) | Self::DecoderRequired => None,
        }
    }
}

/// Runs one full import.
///
/// Returns `Err` only when the run never started (invalid source, missing
/// decoder, no run directory) or when the report itself cannot be written.
/// Stage failures come back as `Ok` with `report.failed = true`.
pub fn run_import(
    options: &ImportOptions,
    services: ImportServices<'_>,
) -> Result<ImportOutcome, ImportError> {
    let started = Instant::now();
    let started_at = Utc::now();
    let ImportServices {
        destination,
        decoder,
        fetcher,
        progress,
    } = services;
    info!(
        "event=import_run module=import status=start kind={}",
        options.kind.as_str()
    );

    if options.kind == SourceKind::Legacy && decoder.is_none() {
        error!("event=import_run module=import status=error error_code=decoder_required");
        return Err(ImportError::DecoderRequired);
    }

    let summary = scan_source(&options.source_root, options.kind);
    if !summary.valid {
        warn!(
            "event=import_run module=import status=error error_code=invalid_source error_count={}",
            summary.errors.len()
        );
        return Err(ImportError::InvalidSource(Box::new(summary)));
    }

    let run_dir = create_run_dir(&options.backup_root, started_at)?;
    let mut report = ImportReport::new(started_at, summary, run_dir.clone());
    let reporter = ProgressReporter::new(progress, options.config.progress_every);

    let package = match (options.kind, decoder) {
        (SourceKind::Legacy, Some(decoder)) => {
            prepare_legacy(options, decoder, &reporter, &mut report)
        }
        (SourceKind::Legacy, None) => return Err(ImportError::DecoderRequired),
        (kind, _) => prepare_tree(options, kind, fetcher, &reporter, &mut report),
    };
    if let Some(package) = package {
        write_package(&package, destination, options, &reporter, &mut report);
    }

    report.stats.duration_ms = started.elapsed().as_millis() as u64;
    report.finished_at = Some(Utc::now());
    let report_path = report
        .write_to(&run_dir)
        .map_err(|err| ImportError::Report {
            path: run_dir.join(REPORT_FILE_NAME),
            source: err,
        })?;

    if report.failed {
        warn!(
            "event=import_run module=import status=error notes={} errors={} duration_ms={}",
            report.stats.notes_prepared,
            report.errors.len(),
            report.stats.duration_ms
        );
    } else {
        info!(
            "event=import_run module=import status=ok notes={} decode_errors={} missing={} duration_ms={}",
            report.stats.notes_prepared,
            report.decode_errors.len(),
            report.missing_resources.len(),
            report.stats.duration_ms
        );
    }
    Ok(ImportOutcome {
        report,
        report_path,
    })
}

/// Creates `<backup_root>/import-<YYYYMMDD-HHMMSS>`, suffixing `-N` when a
/// run in the same second already claimed the name.
fn create_run_dir(backup_root: &Path, started_at: DateTime<Utc>) -> Result<PathBuf, ImportError> {
    let stamp = started_at.format("%Y%m%d-%H%M%S").to_string();
    let mut candidate = backup_root.join(format!("import-{stamp}"));
    let mut suffix = 1u32;
    while candidate.exists() {
        suffix += 1;
        candidate = backup_root.join(format!("import-{stamp}-{suffix}"));
    }
    fs::create_dir_all(&candidate).map_err(|err| ImportError::RunDir {
        path: candidate.clone(),
        source: err,
    })?;
    Ok(candidate)
}

fn fail_stage(stage: StageProgress<'_>, report: &mut ImportReport, stage_name: Stage, message: String) {
    error!(
        "event=import_stage module=import status=error stage={} error={}",
        stage_name.as_str(),
        message
    );
    stage.fail(message.clone());
    report.fail(message);
}

fn enml_options(config: &ImportConfig) -> EnmlOptions {
    EnmlOptions {
        collapse_breaks: config.collapse_breaks,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn count_status(stats: &mut ImportStats, status: AttachmentStatus) {
    match status {
        AttachmentStatus::Copied => stats.attachments_copied += 1,
        AttachmentStatus::Reused => stats.attachments_reused += 1,
        AttachmentStatus::Missing => stats.attachments_missing += 1,
        AttachmentStatus::CopyFailed => stats.attachments_failed += 1,
        AttachmentStatus::Inactive => stats.attachments_inactive += 1,
        AttachmentStatus::Skipped => stats.attachments_skipped += 1,
    }
}

fn copy_status(outcome: CopyOutcome) -> AttachmentStatus {
    match outcome {
        CopyOutcome::Copied => AttachmentStatus::Copied,
        CopyOutcome::Reused => AttachmentStatus::Reused,
    }
}

/// Extension from name/MIME, falling back to the file's leading bytes.
fn extension_for_file(path: &Path, mime: Option<&str>, filename: Option<&str>) -> String {
    let extension = infer_extension(mime, filename, None);
    if extension != FALLBACK_EXTENSION {
        return extension;
    }
    let mut head = Vec::new();
    match File::open(path).and_then(|file| file.take(SNIFF_BYTES).read_to_end(&mut head)) {
        Ok(_) => infer_extension(None, None, Some(&head)),
        Err(_) => extension,
    }
}

fn legacy_layout(summary: &SourceSummary) -> LegacyLayout {
    let paths = &summary.required_paths;
    match (&paths.store, &paths.documents) {
        (Some(store), Some(documents)) => LegacyLayout {
            store: store.clone(),
            documents: documents.clone(),
            resource_roots: paths.resource_roots.clone(),
        },
        _ => resolve_layout(&summary.source_root),
    }
}

fn prepare_legacy(
    options: &ImportOptions,
    decoder: Arc<dyn UpdateLogDecoder>,
    reporter: &ProgressReporter,
    report: &mut ImportReport,
) -> Option<ImportPackage> {
    let layout = legacy_layout(&report.summary);
    let default_ts = report.started_at.timestamp();

    let counts = report.summary.counts;
    let stage = reporter.start(
        Stage::Tables,
        counts.notes + counts.notebooks + counts.tags + counts.note_tags + counts.attachments,
    );
    let extracted = open_source_db(&layout.store)
        .map_err(ExtractError::from)
        .and_then(|conn| extract_legacy(&conn));
    let extraction = match extracted {
        Ok(extraction) => extraction,
        Err(err) => {
            fail_stage(
                stage,
                report,
                Stage::Tables,
                format!("cannot read primary store: {err}"),
            );
            return None;
        }
    };
    report.errors.extend(extraction.row_errors.iter().cloned());
    report.stats.notes_seen = extraction.notes.len() as u64;
    report.stats.excluded_notes = extraction.excluded_notes as u64;
    stage.done(Some(format!(
        "{} notes, {} notebooks, {} tags",
        extraction.notes.len(),
        extraction.notebooks.len(),
        extraction.tags.len()
    )));

    let (assets, attachments) = copy_legacy_resources(&extraction, &layout, options, reporter, report);
    let notes = decode_legacy_notes(&extraction, &layout, &assets, decoder, options, reporter, report);

    let mut package = ImportPackage::new(SourceKind::Legacy);
    let mut stacks = BTreeMap::new();
    for notebook in &extraction.notebooks {
        let stack_id = notebook.stack.as_ref().map(|name| {
            let id = stable_id("stack", name);
            stacks.insert(id.clone(), name.clone());
            id
        });
        let created_at = normalize_timestamp(notebook.created_at, default_ts);
        package.notebooks.push(PackageNotebook {
            id: notebook.id.clone(),
            name: notebook.name.clone(),
            stack_id,
            created_at,
            updated_at: normalize_timestamp(notebook.updated_at, created_at),
        });
    }
    package.stacks = stacks
        .into_iter()
        .map(|(id, name)| PackageStack { id, name })
        .collect();
    package.tags = extraction
        .tags
        .iter()
        .map(|tag| PackageTag {
            id: tag.id.clone(),
            name: tag.name.clone(),
            parent_id: tag.parent_id.clone(),
        })
        .collect();
    report.stats.notes_prepared = notes.len() as u64;
    package.notes = notes;
    package.attachments = attachments;
    Some(package)
}

fn copy_legacy_resources(
    extraction: &LegacyExtraction,
    layout: &LegacyLayout,
    options: &ImportOptions,
    reporter: &ProgressReporter,
    report: &mut ImportReport,
) -> (AssetMap, Vec<AttachmentRecord>) {
    let total = extraction.attachments.len() + extraction.skipped_attachments.len();
    let mut stage = reporter.start(Stage::Resources, total as u64);
    let mut assets = AssetMap::new();
    let mut attachments = Vec::with_capacity(total);

    for row in &extraction.skipped_attachments {
        attachments.push(attachment_record(row, None, AttachmentStatus::Skipped));
        count_status(&mut report.stats, AttachmentStatus::Skipped);
        stage.advance();
    }
    for row in &extraction.attachments {
        let (local_file, status) =
            place_legacy_attachment(row, layout, &options.assets_root, &mut assets, report);
        count_status(&mut report.stats, status);
        attachments.push(attachment_record(row, local_file, status));
        stage.advance();
    }

    let stats = &report.stats;
    stage.done(Some(format!(
        "{} copied, {} reused, {} missing, {} failed",
        stats.attachments_copied,
        stats.attachments_reused,
        stats.attachments_missing,
        stats.attachments_failed
    )));
    (assets, attachments)
}

fn place_legacy_attachment(
    row: &AttachmentRow,
    layout: &LegacyLayout,
    assets_root: &Path,
    assets: &mut AssetMap,
    report: &mut ImportReport,
) -> (Option<AssetRecord>, AttachmentStatus) {
    if !row.active {
        return (None, AttachmentStatus::Inactive);
    }

    let source = match resolve_resource(&layout.resource_roots, &row.note_id, &row.data_hash) {
        ResourceLocation::Found(path) => path,
        ResourceLocation::Missing { probed } => {
            report.missing_resources.push(MissingResource {
                note_id: row.note_id.clone(),
                reference: row.data_hash.clone(),
                filename: row.filename.clone(),
                probed_path: probed,
            });
            return (None, AttachmentStatus::Missing);
        }
    };

    let extension = extension_for_file(&source, row.mime.as_deref(), row.filename.as_deref());
    let record = place(assets_root, &row.data_hash, &extension);
    match copy_asset(&source, &record) {
        Ok(outcome) => {
            assets.insert_named(record.clone(), row.filename.as_deref());
            (Some(record), copy_status(outcome))
        }
        Err(err) => {
            warn!(
                "event=asset_copy module=import status=error note_id={} hash={} error={}",
                row.note_id, row.data_hash, err
            );
            report.asset_copy_errors.push(AssetCopyError {
                note_id: Some(row.note_id.clone()),
                reference: row.data_hash.clone(),
                error: err.to_string(),
            });
            (None, AttachmentStatus::CopyFailed)
        }
    }
}

fn attachment_record(
    row: &AttachmentRow,
    local_file: Option<AssetRecord>,
    status: AttachmentStatus,
) -> AttachmentRecord {
    AttachmentRecord {
        note_source_id: row.note_id.clone(),
        data_hash: row.data_hash.clone(),
        filename: row.filename.clone(),
        mime: row.mime.clone(),
        size: row.size,
        local_file,
        status,
    }
}

fn decode_legacy_notes(
    extraction: &LegacyExtraction,
    layout: &LegacyLayout,
    assets: &AssetMap,
    decoder: Arc<dyn UpdateLogDecoder>,
    options: &ImportOptions,
    reporter: &ProgressReporter,
    report: &mut ImportReport,
) -> Vec<PackageNote> {
    let default_ts = report.started_at.timestamp();
    let timeout = options.config.decode_timeout();
    let enml = enml_options(&options.config);

    let notebook_ids = extraction
        .notebooks
        .iter()
        .map(|notebook| notebook.id.as_str())
        .collect::<HashSet<_>>();
    let tag_ids = extraction
        .tags
        .iter()
        .map(|tag| tag.id.as_str())
        .collect::<HashSet<_>>();
    let mut tags_by_note: HashMap<&str, Vec<String>> = HashMap::new();
    for link in &extraction.note_tags {
        if tag_ids.contains(link.tag_id.as_str()) {
            tags_by_note
                .entry(link.note_id.as_str())
                .or_default()
                .push(link.tag_id.clone());
        }
    }

    let mut stage = reporter.start(Stage::Decode, extraction.notes.len() as u64);
    let mut notes = Vec::with_capacity(extraction.notes.len());
    for row in &extraction.notes {
        let fallback_title = non_empty(&row.title).unwrap_or_else(|| UNTITLED.to_string());
        let created_at = normalize_timestamp(row.created_at, default_ts);
        let updated_at = normalize_timestamp(row.updated_at, created_at);

        let located = layout.locate_update_log(&row.id);
        let found = located.is_ok();
        let decoded = read_update_log(located)
            .and_then(|bytes| decode_with_timeout(Arc::clone(&decoder), bytes, timeout));
        let decoded = match decoded {
            Ok(regions) => DecodedNote {
                source_id: row.id.clone(),
                title: non_empty(&regions.title).unwrap_or(fallback_title),
                raw_markup: regions.content_markup,
                structured_meta: StructuredMeta {
                    style: regions.style,
                    meta: regions.meta,
                },
                created_at,
                updated_at,
            },
            Err(err) => {
                warn!(
                    "event=note_decode module=import status=error note_id={} found={} error={}",
                    row.id, found, err
                );
                report.decode_errors.push(DecodeFailure {
                    note_id: row.id.clone(),
                    title: fallback_title.clone(),
                    found,
                    error: err.to_string(),
                });
                DecodedNote {
                    source_id: row.id.clone(),
                    title: fallback_title,
                    raw_markup: String::new(),
                    structured_meta: StructuredMeta::default(),
                    created_at,
                    updated_at,
                }
            }
        };

        let refs = NoteRefs {
            notebook_ref: row
                .notebook_id
                .clone()
                .filter(|id| notebook_ids.contains(id.as_str())),
            tag_refs: tags_by_note
                .get(row.id.as_str())
                .cloned()
                .unwrap_or_default(),
        };
        notes.push(PackageNote {
            id: row.id.clone(),
            note: normalize_legacy(decoded, refs, assets, enml),
        });
        stage.advance();
    }

    stage.done(Some(format!(
        "{} notes, {} decode errors",
        notes.len(),
        report.decode_errors.len()
    )));
    notes
}

fn prepare_tree(
    options: &ImportOptions,
    kind: SourceKind,
    fetcher: &dyn RemoteFetcher,
    reporter: &ProgressReporter,
    report: &mut ImportReport,
) -> Option<ImportPackage> {
    let root = options.source_root.as_path();
    let counts = report.summary.counts;
    let stage = reporter.start(Stage::Tables, counts.notes + counts.attachments);
    let extraction = extract_tree(root, kind);
    report.errors.extend(extraction.errors.iter().cloned());
    report.stats.notes_seen = extraction.notes.len() as u64;
    stage.done(Some(format!(
        "{} notes, {} assets",
        extraction.notes.len(),
        extraction.assets.len()
    )));

    let (index, statuses) = copy_tree_assets(&extraction, options, reporter, report);

    let offline = OfflineFetcher;
    let fetcher: &dyn RemoteFetcher = if options.config.remote_downloads {
        fetcher
    } else {
        &offline
    };
    let mut context = TreeLinkContext::new(
        root,
        &options.assets_root,
        &extraction.link_index,
        &index,
        fetcher,
    );
    let default_ts = report.started_at.timestamp();
    let enml = enml_options(&options.config);
    let mut attachments = Vec::new();
    let mut notes = Vec::with_capacity(extraction.notes.len());

    let mut stage = reporter.start(Stage::Decode, extraction.notes.len() as u64);
    for entry in &extraction.notes {
        let title = entry.stem();
        let raw_markup = match fs::read(&entry.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                warn!(
                    "event=note_read module=import status=error source_id={} error={}",
                    entry.source_id, err
                );
                report.decode_errors.push(DecodeFailure {
                    note_id: entry.source_id.clone(),
                    title: title.clone(),
                    found: true,
                    error: format!("cannot read note file: {err}"),
                });
                String::new()
            }
        };
        let modified_at = modified_seconds(&entry.path).unwrap_or(default_ts);
        let decoded = DecodedNote {
            source_id: entry.source_id.clone(),
            title,
            raw_markup,
            structured_meta: StructuredMeta::default(),
            created_at: modified_at,
            updated_at: modified_at,
        };
        let refs = NoteRefs {
            notebook_ref: Some(entry.notebook.id()),
            tag_refs: Vec::new(),
        };

        let mut resolver = context.for_note(entry);
        let note = normalize_tree(decoded, entry.kind, refs, &mut resolver, enml);
        let findings = resolver.into_findings();
        record_findings(entry, findings, &statuses, &mut attachments, report);

        notes.push(PackageNote {
            id: entry.note_id.clone(),
            note,
        });
        stage.advance();
    }
    report.stats.remote_downloads = context
        .downloads
        .values()
        .filter(|record| record.is_some())
        .count() as u64;
    stage.done(Some(format!(
        "{} notes, {} missing targets",
        notes.len(),
        report.missing_resources.len()
    )));

    let mut package = ImportPackage::new(kind);
    package.stacks = extraction
        .stacks
        .iter()
        .map(|stack| PackageStack {
            id: stack.id.clone(),
            name: stack.name.clone(),
        })
        .collect();
    package.notebooks = extraction
        .notebooks
        .iter()
        .map(|notebook| PackageNotebook {
            id: notebook.id.clone(),
            name: notebook.name.clone(),
            stack_id: notebook.stack_id.clone(),
            created_at: default_ts,
            updated_at: default_ts,
        })
        .collect();
    report.stats.notes_prepared = notes.len() as u64;
    package.notes = notes;
    package.attachments = attachments;
    Some(package)
}

fn copy_tree_assets(
    extraction: &TreeExtraction,
    options: &ImportOptions,
    reporter: &ProgressReporter,
    report: &mut ImportReport,
) -> (TreeAssetIndex, HashMap<String, AttachmentStatus>) {
    let root = options.source_root.as_path();
    let mut stage = reporter.start(Stage::Resources, extraction.assets.len() as u64);
    let mut index = TreeAssetIndex::new();
    let mut statuses = HashMap::new();

    for path in &extraction.assets {
        let Some(relative) = relative_slash_path(root, path) else {
            stage.advance();
            continue;
        };
        let placed = sha256_file(path)
            .map_err(|err| err.to_string())
            .and_then(|hash| {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                let extension = extension_for_file(path, None, name.as_deref());
                let record = place(&options.assets_root, &hash, &extension);
                copy_asset(path, &record)
                    .map(|outcome| (record, copy_status(outcome)))
                    .map_err(|err| err.to_string())
            });
        match placed {
            Ok((record, status)) => {
                count_status(&mut report.stats, status);
                statuses.entry(record.hash.clone()).or_insert(status);
                index.insert(&relative, record);
            }
            Err(error) => {
                warn!(
                    "event=asset_copy module=import status=error source_path={} error={}",
                    relative, error
                );
                count_status(&mut report.stats, AttachmentStatus::CopyFailed);
                report.asset_copy_errors.push(AssetCopyError {
                    note_id: None,
                    reference: relative,
                    error,
                });
            }
        }
        stage.advance();
    }

    stage.done(Some(format!("{} assets placed", index.len())));
    (index, statuses)
}

fn record_findings(
    entry: &NoteFileEntry,
    findings: LinkFindings,
    statuses: &HashMap<String, AttachmentStatus>,
    attachments: &mut Vec<AttachmentRecord>,
    report: &mut ImportReport,
) {
    report.errors.extend(findings.errors);
    for missing in findings.missing {
        report.stats.attachments_missing += 1;
        report.missing_resources.push(MissingResource {
            note_id: entry.source_id.clone(),
            reference: missing.target,
            filename: None,
            probed_path: missing.probed,
        });
    }
    for (url, error) in findings.asset_errors {
        report.stats.attachments_failed += 1;
        report.asset_copy_errors.push(AssetCopyError {
            note_id: Some(entry.source_id.clone()),
            reference: url,
            error,
        });
    }
    for record in findings.assets {
        let status = statuses
            .get(&record.hash)
            .copied()
            .unwrap_or(AttachmentStatus::Copied);
        let filename = record
            .absolute_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        attachments.push(AttachmentRecord {
            note_source_id: entry.source_id.clone(),
            data_hash: record.hash.clone(),
            filename,
            mime: mime_for_extension(&record.extension).map(str::to_string),
            size: file_size(&record.absolute_path),
            local_file: Some(record),
            status,
        });
    }
}

fn modified_seconds(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let seconds = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(seconds).ok()
}

fn write_package(
    package: &ImportPackage,
    destination: &mut dyn DestinationStore,
    options: &ImportOptions,
    reporter: &ProgressReporter,
    report: &mut ImportReport,
) {
    let run_dir = report.backup_dir.clone();
    let stage = reporter.start(Stage::Write, package.notes.len() as u64);

    match destination.has_existing_data() {
        Ok(true) => match destination.backup(&run_dir) {
            Ok(dir) => info!(
                "event=destination_backup module=import status=ok dir={}",
                dir.display()
            ),
            Err(err) => {
                fail_stage(stage, report, Stage::Write, format!("backup failed: {err}"));
                return;
            }
        },
        Ok(false) => info!(
            "event=destination_backup module=import status=ok skipped=empty_destination dir={}",
            run_dir.display()
        ),
        Err(err) => {
            fail_stage(
                stage,
                report,
                Stage::Write,
                format!("cannot inspect destination: {err}"),
            );
            return;
        }
    }

    let json = match package.write_to(&run_dir) {
        Ok((_, json)) => json,
        Err(err) => {
            fail_stage(
                stage,
                report,
                Stage::Write,
                format!("cannot write import package: {err}"),
            );
            return;
        }
    };

    let counts = match destination.import_from_json(&json, &options.assets_root) {
        Ok(counts) => counts,
        Err(err) => {
            fail_stage(stage, report, Stage::Write, format!("persist failed: {err}"));
            return;
        }
    };
    report.stats.written = Some(counts);

    if let Err(err) = destination.backfill() {
        warn!(
            "event=destination_backfill module=import status=error error={}",
            err
        );
        report.errors.push(format!("backfill failed: {err}"));
    }
    stage.done(Some(format!("{} notes written", counts.notes)));
}

#[cfg(test)]
mod tests {
    use super::{create_run_dir, extension_for_file, non_empty};
    use chrono::{TimeZone, Utc};

    #[test]
    fn run_dirs_are_named_by_start_time_and_never_reused() {
        let root = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();

        let first = create_run_dir(root.path(), at).unwrap();
        let second = create_run_dir(root.path(), at).unwrap();

        assert_eq!(first, root.path().join("import-20240305-070809"));
        assert_eq!(second, root.path().join("import-20240305-070809-2"));
        assert!(first.is_dir() && second.is_dir());
    }

    #[test]
    fn unknown_extension_is_sniffed_from_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap();

        assert_eq!(extension_for_file(&path, None, None), "png");
        assert_eq!(extension_for_file(&path, Some("image/jpeg"), None), "jpg");
        assert_eq!(extension_for_file(&dir.path().join("gone"), None, None), "bin");
    }

    #[test]
    fn blank_titles_are_rejected() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" Plan "), Some("Plan".to_string()));
    }
}
