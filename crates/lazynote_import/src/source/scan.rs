//! Source scanning: validity checks and summary counts.
//!
//! # Responsibility
//! - Describe a candidate source root without mutating anything.
//!
//! # Invariants
//! - Scanning never returns an error; problems land in `errors` and flip
//!   `valid` to `false`.
//! - The legacy store is only queried when the file exists, and only
//!   through a read-only connection.

use crate::assets::resolver::{resolve_resource, ResourceLocation};
use crate::db::open_source_db;
use crate::fs_probe::{dir_size, file_size};
use crate::model::source::{ByteSizes, RequiredPaths, SourceCounts, SourceKind, SourceSummary};
use crate::source::layout::{resolve_layout, LegacyLayout};
use crate::source::legacy::{count_rows, distinct_stacks, ensure_required_tables, ExtractError};
use crate::source::tree::{extract_tree, is_image_file};
use log::{info, warn};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

/// Scans `root` as a source of the given kind.
pub fn scan_source(root: &Path, kind: SourceKind) -> SourceSummary {
    let started_at = Instant::now();
    info!(
        "event=source_scan module=source status=start kind={}",
        kind.as_str()
    );

    let summary = if !root.exists() {
        SourceSummary::invalid(
            root.to_path_buf(),
            kind,
            format!("source root does not exist: {}", root.display()),
        )
    } else if !root.is_dir() {
        SourceSummary::invalid(
            root.to_path_buf(),
            kind,
            format!("source root is not a directory: {}", root.display()),
        )
    } else if kind.is_tree() {
        scan_tree(root, kind)
    } else {
        scan_legacy(root)
    };

    if summary.valid {
        info!(
            "event=source_scan module=source status=ok kind={} notes={} attachments={} missing={} duration_ms={}",
            kind.as_str(),
            summary.counts.notes,
            summary.counts.attachments,
            summary.missing_count,
            started_at.elapsed().as_millis()
        );
    } else {
        warn!(
            "event=source_scan module=source status=error kind={} error_count={} duration_ms={}",
            kind.as_str(),
            summary.errors.len(),
            started_at.elapsed().as_millis()
        );
    }
    summary
}

fn scan_legacy(root: &Path) -> SourceSummary {
    let layout = resolve_layout(root);
    let mut errors = Vec::new();
    let mut counts = SourceCounts::default();
    let mut missing_count = 0;
    let mut byte_sizes = ByteSizes {
        store: file_size(&layout.store),
        documents: dir_size(&layout.documents),
        resources: layout.resource_roots.iter().map(|dir| dir_size(dir)).sum(),
        ..ByteSizes::default()
    };

    if !layout.store.is_file() {
        errors.push(format!(
            "primary store not found at {}",
            layout.store.display()
        ));
    }
    if !layout.documents.is_dir() {
        errors.push(format!(
            "document root not found at {}",
            layout.documents.display()
        ));
    }

    if layout.store.is_file() {
        match query_store(&layout) {
            Ok(store) => {
                counts = store.counts;
                byte_sizes.attachments = store.attachment_bytes;
                missing_count = store.missing;
            }
            Err(message) => errors.push(message),
        }
    }

    SourceSummary {
        source_root: root.to_path_buf(),
        kind: SourceKind::Legacy,
        required_paths: RequiredPaths {
            store: Some(layout.store.clone()),
            documents: Some(layout.documents.clone()),
            resource_roots: layout.resource_roots.clone(),
        },
        counts,
        byte_sizes,
        missing_count,
        valid: errors.is_empty(),
        errors,
    }
}

struct StoreFigures {
    counts: SourceCounts,
    attachment_bytes: u64,
    missing: u64,
}

fn query_store(layout: &LegacyLayout) -> Result<StoreFigures, String> {
    let conn = open_source_db(&layout.store)
        .map_err(|err| format!("primary store cannot be opened: {err}"))?;
    ensure_required_tables(&conn).map_err(|err| match err {
        ExtractError::MissingTable(_) => err.to_string(),
        ExtractError::Db(err) => format!("primary store is unreadable: {err}"),
    })?;

    let rows = count_rows(&conn).map_err(|err| format!("primary store query failed: {err}"))?;
    let stacks =
        distinct_stacks(&conn).map_err(|err| format!("primary store query failed: {err}"))?;
    let missing = count_missing_resources(&conn, layout)
        .map_err(|err| format!("primary store query failed: {err}"))?;

    Ok(StoreFigures {
        counts: SourceCounts {
            notes: rows.notes,
            notebooks: rows.notebooks,
            stacks: stacks.len() as u64,
            tags: rows.tags,
            note_tags: rows.note_tags,
            attachments: rows.attachments,
            images: rows.images,
        },
        attachment_bytes: rows.attachment_bytes,
        missing,
    })
}

fn count_missing_resources(conn: &Connection, layout: &LegacyLayout) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare(
        "SELECT a.parent_note_id, a.data_hash
         FROM attachments a
         WHERE COALESCE(a.is_active, 1) != 0
           AND a.parent_note_id IN (
               SELECT id FROM notes WHERE deleted IS NULL OR deleted = 0
           );",
    )?;
    let mut rows = stmt.query([])?;
    let mut missing = 0;
    while let Some(row) = rows.next()? {
        let note_id: Option<String> = row.get(0)?;
        let hash: Option<String> = row.get(1)?;
        let (Some(note_id), Some(hash)) = (note_id, hash) else {
            missing += 1;
            continue;
        };
        let location = resolve_resource(
            &layout.resource_roots,
            &note_id,
            &hash.trim().to_ascii_lowercase(),
        );
        if matches!(location, ResourceLocation::Missing { .. }) {
            missing += 1;
        }
    }
    Ok(missing)
}

fn scan_tree(root: &Path, kind: SourceKind) -> SourceSummary {
    let extraction = extract_tree(root, kind);
    // Unreadable entries are reported but do not invalidate the source.
    let mut errors = extraction.errors.clone();
    let has_notes = !extraction.notes.is_empty();
    if !has_notes {
        errors.push(format!(
            "no {} note files found under {}",
            kind.note_extensions().join("/"),
            root.display()
        ));
    }

    let stacks = extraction
        .notes
        .iter()
        .filter_map(|entry| entry.notebook.stack.clone())
        .collect::<BTreeSet<_>>();

    SourceSummary {
        source_root: root.to_path_buf(),
        kind,
        required_paths: RequiredPaths::default(),
        counts: SourceCounts {
            notes: extraction.notes.len() as u64,
            notebooks: extraction.notebooks.len() as u64,
            stacks: stacks.len() as u64,
            tags: 0,
            note_tags: 0,
            attachments: extraction.assets.len() as u64,
            images: extraction
                .assets
                .iter()
                .filter(|path| is_image_file(path))
                .count() as u64,
        },
        byte_sizes: ByteSizes {
            notes: extraction
                .notes
                .iter()
                .map(|entry| file_size(&entry.path))
                .sum(),
            assets: extraction.assets.iter().map(|path| file_size(path)).sum(),
            ..ByteSizes::default()
        },
        missing_count: 0,
        valid: has_notes,
        errors,
    }
}
