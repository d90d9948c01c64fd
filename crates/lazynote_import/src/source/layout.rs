//! Legacy source directory layout resolution.
//!
//! The legacy application does not write its directory names anywhere we can
//! read, so a bounded walk discovers them and conventional names fill in
//! whatever the walk misses.

use crate::fs_probe::{is_safe_segment, lowercase_extension};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_STORE_FILE: &str = "LocalStore.sql";
pub const DEFAULT_DOCUMENTS_DIR: &str = "documents";
pub const DEFAULT_RESOURCE_DIRS: &[&str] = &["resource-cache", "resources"];

const STORE_EXTENSIONS: &[&str] = &["sql", "sqlite", "db"];
const DOCUMENT_DIR_NAMES: &[&str] = &["documents", "conduit-fs"];
const UPDATE_LOG_EXTENSIONS: &[&str] = &["dat", "yjs"];
const DISCOVERY_DEPTH: usize = 3;
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Resolved legacy sub-paths. Paths may not exist; callers check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLayout {
    pub store: PathBuf,
    pub documents: PathBuf,
    pub resource_roots: Vec<PathBuf>,
}

impl LegacyLayout {
    /// Candidate update-log files for one note, in probe order.
    ///
    /// Returns nothing for ids that are not a single safe path segment.
    pub fn update_log_candidates(&self, note_id: &str) -> Vec<PathBuf> {
        if !is_safe_segment(note_id) {
            return Vec::new();
        }
        let mut candidates = UPDATE_LOG_EXTENSIONS
            .iter()
            .map(|ext| self.documents.join(format!("{note_id}.{ext}")))
            .collect::<Vec<_>>();
        candidates.extend(
            UPDATE_LOG_EXTENSIONS
                .iter()
                .map(|ext| self.documents.join(note_id).join(format!("content.{ext}"))),
        );
        candidates
    }

    /// First existing update log for a note, or the first candidate as the
    /// path to report when none exists.
    pub fn locate_update_log(&self, note_id: &str) -> Result<PathBuf, Option<PathBuf>> {
        let candidates = self.update_log_candidates(note_id);
        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(candidates.into_iter().next()),
        }
    }
}

#[derive(Debug, Default)]
struct Discovered {
    store: Option<PathBuf>,
    documents: Option<PathBuf>,
    resource_roots: Vec<PathBuf>,
}

/// Resolves the legacy layout under `root`.
pub fn resolve_layout(root: &Path) -> LegacyLayout {
    let discovered = discover(root);

    let resource_roots = if discovered.resource_roots.is_empty() {
        DEFAULT_RESOURCE_DIRS
            .iter()
            .map(|name| root.join(name))
            .collect()
    } else {
        discovered.resource_roots
    };

    LegacyLayout {
        store: discovered
            .store
            .unwrap_or_else(|| root.join(DEFAULT_STORE_FILE)),
        documents: discovered
            .documents
            .unwrap_or_else(|| root.join(DEFAULT_DOCUMENTS_DIR)),
        resource_roots,
    }
}

fn discover(root: &Path) -> Discovered {
    let mut found = Discovered::default();
    if !root.is_dir() {
        return found;
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(DISCOVERY_DEPTH)
        .follow_links(false)
        .sort_by_file_name();

    let mut stores = Vec::new();
    for entry in walker.into_iter().filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if entry.file_type().is_file() {
            if let Some(rank) = store_extension_rank(entry.path()) {
                if !inside_data_dir(root, entry.path()) {
                    let rank = StoreRank::of(entry.path(), rank, entry.depth());
                    stores.push((rank, entry.into_path()));
                }
            }
        } else if entry.file_type().is_dir() {
            if DOCUMENT_DIR_NAMES.contains(&name.as_str()) && found.documents.is_none() {
                found.documents = Some(entry.into_path());
            } else if DEFAULT_RESOURCE_DIRS.contains(&name.as_str()) {
                found.resource_roots.push(entry.into_path());
            }
        }
    }

    let conventional = root.join(DEFAULT_STORE_FILE);
    found.store = if conventional.is_file() {
        Some(conventional)
    } else {
        // Stable sort keeps walk order among equal ranks.
        stores.sort_by_key(|(rank, _)| *rank);
        stores.into_iter().next().map(|(_, path)| path)
    };
    found
}

/// Orders store candidates: SQLite files first, then by extension, then
/// shallower paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct StoreRank {
    not_sqlite: bool,
    extension: usize,
    depth: usize,
}

impl StoreRank {
    fn of(path: &Path, extension: usize, depth: usize) -> Self {
        Self {
            not_sqlite: !has_sqlite_header(path),
            extension,
            depth,
        }
    }
}

fn store_extension_rank(path: &Path) -> Option<usize> {
    let ext = lowercase_extension(path)?;
    STORE_EXTENSIONS.iter().position(|known| *known == ext)
}

/// True when `path` sits below a document or resource directory.
fn inside_data_dir(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let Some(parent) = relative.parent() else {
        return false;
    };
    parent.components().any(|component| {
        let name = component.as_os_str().to_string_lossy().to_ascii_lowercase();
        DOCUMENT_DIR_NAMES.contains(&name.as_str())
            || DEFAULT_RESOURCE_DIRS.contains(&name.as_str())
    })
}

fn has_sqlite_header(path: &Path) -> bool {
    let mut header = [0u8; SQLITE_HEADER.len()];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map(|_| header == *SQLITE_HEADER)
        .unwrap_or(false)
}
