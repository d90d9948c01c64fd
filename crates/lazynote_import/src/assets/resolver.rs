//! Resource lookup, deterministic placement and idempotent copy.
//!
//! # Invariants
//! - [`place`] does no I/O and depends only on `(hash, extension)`.
//! - Copying the same hash twice leaves one file and reports `Reused`.
//! - Copies land via a temporary sibling and a rename, so a failed copy
//!   never leaves a truncated asset at the final path.

use crate::fs_probe::is_safe_segment;
use crate::model::asset::AssetRecord;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FALLBACK_EXTENSION: &str = "bin";
const SHARD_FALLBACK: &str = "00";

#[derive(Debug)]
pub enum AssetError {
    /// Source file is absent at copy time.
    SourceMissing(PathBuf),
    Io { path: PathBuf, source: io::Error },
}

impl Display for AssetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceMissing(path) => write!(f, "asset source missing: {}", path.display()),
            Self::Io { path, source } => write!(f, "asset io error at {}: {source}", path.display()),
        }
    }
}

impl Error for AssetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SourceMissing(_) => None,
            Self::Io { source, .. } => Some(source),
        }
    }
}

/// Where a resource was (or would have been) found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocation {
    Found(PathBuf),
    /// Nothing matched; `probed` is the first-root path, for reporting.
    Missing { probed: PathBuf },
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// Target already held a file of the same size.
    Reused,
}

/// Probes `root/note_id/hash` in each root, first hit wins.
pub fn resolve_resource(roots: &[PathBuf], note_id: &str, hash: &str) -> ResourceLocation {
    let best_guess = |root: &Path| root.join(note_id).join(hash);
    let probed = roots
        .first()
        .map(|root| best_guess(root))
        .unwrap_or_else(|| PathBuf::from(note_id).join(hash));

    if !is_safe_segment(note_id) || !is_safe_segment(hash) {
        return ResourceLocation::Missing { probed };
    }

    for root in roots {
        let candidate = best_guess(root);
        if candidate.is_file() {
            return ResourceLocation::Found(candidate);
        }
    }
    ResourceLocation::Missing { probed }
}

/// Computes the sharded destination of an asset. Pure.
///
/// Layout: `<assets_root>/<hash[0..2]>/<hash>.<ext>`. The hash is lowercased
/// and reduced to ASCII alphanumerics; an empty extension maps to `bin`.
pub fn place(assets_root: &Path, hash: &str, extension: &str) -> AssetRecord {
    let hash = hash
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    let extension = sanitize_extension(extension);
    let shard = if hash.len() >= 2 {
        hash[..2].to_string()
    } else {
        SHARD_FALLBACK.to_string()
    };
    let file_name = format!("{hash}.{extension}");

    AssetRecord {
        relative_path: format!("{shard}/{file_name}"),
        absolute_path: assets_root.join(&shard).join(&file_name),
        hash,
        extension,
    }
}

/// Copies `source` to the record's target unless an equal-size file is
/// already there.
pub fn copy_asset(source: &Path, record: &AssetRecord) -> Result<CopyOutcome, AssetError> {
    let source_meta = match fs::metadata(source) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Err(AssetError::SourceMissing(source.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(AssetError::SourceMissing(source.to_path_buf()))
        }
        Err(err) => {
            return Err(AssetError::Io {
                path: source.to_path_buf(),
                source: err,
            })
        }
    };

    if target_matches(&record.absolute_path, source_meta.len()) {
        return Ok(CopyOutcome::Reused);
    }

    let staging = staging_path(&record.absolute_path);
    ensure_parent(&record.absolute_path)?;
    fs::copy(source, &staging).map_err(|err| AssetError::Io {
        path: record.absolute_path.clone(),
        source: err,
    })?;
    commit_staging(&staging, &record.absolute_path)?;
    Ok(CopyOutcome::Copied)
}

/// Writes in-memory bytes (downloads) with the same idempotency rule.
pub fn write_asset(bytes: &[u8], record: &AssetRecord) -> Result<CopyOutcome, AssetError> {
    if target_matches(&record.absolute_path, bytes.len() as u64) {
        return Ok(CopyOutcome::Reused);
    }

    let staging = staging_path(&record.absolute_path);
    ensure_parent(&record.absolute_path)?;
    fs::write(&staging, bytes).map_err(|err| AssetError::Io {
        path: record.absolute_path.clone(),
        source: err,
    })?;
    commit_staging(&staging, &record.absolute_path)?;
    Ok(CopyOutcome::Copied)
}

/// Picks a file extension from MIME type, then filename, then sniffed bytes.
pub fn infer_extension(mime: Option<&str>, filename: Option<&str>, bytes: Option<&[u8]>) -> String {
    if let Some(ext) = mime.and_then(extension_for_mime) {
        return ext.to_string();
    }
    if let Some(ext) = filename
        .and_then(|name| Path::new(name).extension())
        .map(|ext| sanitize_extension(&ext.to_string_lossy()))
        .filter(|ext| ext != FALLBACK_EXTENSION)
    {
        return ext;
    }
    if let Some(kind) = bytes.and_then(infer::get) {
        return kind.extension().to_string();
    }
    FALLBACK_EXTENSION.to_string()
}

/// Best-effort MIME type for an extension, used when rendering references.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(mime)
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match mime.split(';').next()?.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/heic" => "heic",
        "application/pdf" => "pdf",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "video/mp4" => "mp4",
        "text/plain" => "txt",
        _ => return None,
    };
    Some(ext)
}

fn sanitize_extension(extension: &str) -> String {
    let cleaned = extension
        .trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(10)
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        FALLBACK_EXTENSION.to_string()
    } else {
        cleaned
    }
}

fn target_matches(target: &Path, expected_len: u64) -> bool {
    fs::metadata(target)
        .map(|meta| meta.is_file() && meta.len() == expected_len)
        .unwrap_or(false)
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

fn ensure_parent(target: &Path) -> Result<(), AssetError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| AssetError::Io {
            path: parent.to_path_buf(),
            source: err,
        })?;
    }
    Ok(())
}

fn commit_staging(staging: &Path, target: &Path) -> Result<(), AssetError> {
    fs::rename(staging, target).map_err(|err| {
        let _ = fs::remove_file(staging);
        AssetError::Io {
            path: target.to_path_buf(),
            source: err,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{
        copy_asset, infer_extension, place, resolve_resource, CopyOutcome, ResourceLocation,
    };
    use std::fs;
    use std::path::Path;

    #[test]
    fn place_is_deterministic_and_sharded() {
        let first = place(Path::new("/assets"), "ABCDEF12", "PNG");
        let second = place(Path::new("/assets"), "abcdef12", "png");

        assert_eq!(first, second);
        assert_eq!(first.relative_path, "ab/abcdef12.png");
        assert_eq!(first.absolute_path, Path::new("/assets/ab/abcdef12.png"));
    }

    #[test]
    fn place_handles_short_hash_and_empty_extension() {
        let record = place(Path::new("/assets"), "a", "");
        assert_eq!(record.relative_path, "00/a.bin");
    }

    #[test]
    fn resolve_probes_roots_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::create_dir_all(second.join("note-1")).unwrap();
        fs::write(second.join("note-1/cafe"), b"x").unwrap();

        let roots = vec![first.clone(), second.clone()];
        assert_eq!(
            resolve_resource(&roots, "note-1", "cafe"),
            ResourceLocation::Found(second.join("note-1/cafe"))
        );
        assert_eq!(
            resolve_resource(&roots, "note-1", "beef"),
            ResourceLocation::Missing {
                probed: first.join("note-1/beef")
            }
        );
    }

    #[test]
    fn copy_twice_reuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blob");
        fs::write(&source, b"payload").unwrap();
        let record = place(&dir.path().join("assets"), "cafebabe", "bin");

        assert_eq!(copy_asset(&source, &record).unwrap(), CopyOutcome::Copied);
        assert_eq!(copy_asset(&source, &record).unwrap(), CopyOutcome::Reused);
        assert_eq!(fs::read(&record.absolute_path).unwrap(), b"payload");
        let shard_entries = fs::read_dir(record.absolute_path.parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(shard_entries, 1);
    }

    #[test]
    fn extension_prefers_mime_then_filename_then_sniffing() {
        assert_eq!(infer_extension(Some("image/jpeg"), Some("a.png"), None), "jpg");
        assert_eq!(infer_extension(None, Some("scan.PDF"), None), "pdf");
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(infer_extension(None, None, Some(&png_magic)), "png");
        assert_eq!(infer_extension(None, None, None), "bin");
    }
}
