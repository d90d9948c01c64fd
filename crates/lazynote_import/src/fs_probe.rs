//! Filesystem probes shared by scan, extraction and asset stages.
//!
//! # Invariants
//! - Probes never fail the caller: unreadable entries are collected as
//!   error strings so the stage can report them per item.
//! - Listings are sorted by file name for deterministic runs.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Files found under a root plus entries that could not be read.
#[derive(Debug, Default)]
pub struct FileListing {
    pub files: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Lists regular files recursively, skipping hidden entries.
pub fn list_files_recursive(root: &Path) -> FileListing {
    let mut listing = FileListing::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => listing.files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => listing.errors.push(format!("cannot read entry: {err}")),
        }
    }
    listing
}

/// Sums file sizes below `path`; a missing path counts as zero.
pub fn dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Size of one file, zero when it cannot be read.
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

/// Root-relative path with `/` separators, or `None` when `path` is outside
/// `root`.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Lowercase extension without the dot.
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Whether `value` can be used as one path segment without escaping its
/// parent directory.
pub fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
