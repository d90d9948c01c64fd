//! Asset placement and attachment records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Deterministic destination of one asset blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub hash: String,
    pub extension: String,
    /// Relative to the assets root, `/`-separated: `<hash[0..2]>/<hash>.<ext>`.
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

/// One source attachment and where (if anywhere) its bytes landed.
///
/// Kept in the output even when `local_file` is `None`, so a reference is
/// never dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub note_source_id: String,
    pub data_hash: String,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub size: u64,
    pub local_file: Option<AssetRecord>,
    pub status: AttachmentStatus,
}

/// Classification of an attachment after the resources stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    /// Bytes copied into the assets root by this run.
    Copied,
    /// Target already held the same bytes.
    Reused,
    /// No file in any resource root.
    Missing,
    /// Copy attempted and failed.
    CopyFailed,
    /// Attachment row is flagged inactive.
    Inactive,
    /// Parent note was excluded (soft-deleted or absent).
    Skipped,
}

impl AttachmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copied => "copied",
            Self::Reused => "reused",
            Self::Missing => "missing",
            Self::CopyFailed => "copy_failed",
            Self::Inactive => "inactive",
            Self::Skipped => "skipped",
        }
    }
}

/// Run-scoped map from content hash to placed asset.
///
/// Owned by one pipeline run and passed explicitly to each stage.
#[derive(Debug, Default)]
pub struct AssetMap {
    by_hash: HashMap<String, AssetRecord>,
    display_names: HashMap<String, String>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &str) -> Option<&AssetRecord> {
        self.by_hash.get(&hash.to_ascii_lowercase())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.get(hash).is_some()
    }

    /// Records a placed asset. The first record for a hash wins.
    pub fn insert(&mut self, record: AssetRecord) -> &AssetRecord {
        self.by_hash
            .entry(record.hash.to_ascii_lowercase())
            .or_insert(record)
    }

    /// Like [`AssetMap::insert`], also remembering the original file name.
    pub fn insert_named(&mut self, record: AssetRecord, name: Option<&str>) -> &AssetRecord {
        let key = record.hash.to_ascii_lowercase();
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            self.display_names
                .entry(key.clone())
                .or_insert_with(|| name.to_string());
        }
        self.by_hash.entry(key).or_insert(record)
    }

    /// Original file name for link text, if one was recorded.
    pub fn display_name(&self, hash: &str) -> Option<&str> {
        self.display_names
            .get(&hash.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

/// Placed tree-source assets, addressable by root-relative path or by file
/// name.
#[derive(Debug, Default)]
pub struct TreeAssetIndex {
    by_path: HashMap<String, AssetRecord>,
    by_name: HashMap<String, Vec<String>>,
}

impl TreeAssetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the asset copied from `source_path` (root-relative, `/`).
    pub fn insert(&mut self, source_path: &str, record: AssetRecord) {
        let key = source_path.to_lowercase();
        let name = key.rsplit('/').next().unwrap_or(&key).to_string();
        let paths = self.by_name.entry(name).or_default();
        if !paths.contains(&key) {
            paths.push(key.clone());
            paths.sort();
        }
        self.by_path.insert(key, record);
    }

    pub fn by_path(&self, source_path: &str) -> Option<&AssetRecord> {
        self.by_path.get(&source_path.to_lowercase())
    }

    /// Looks a bare file name up; `Err` carries every path sharing the name.
    pub fn by_name(&self, name: &str) -> Result<Option<&AssetRecord>, Vec<String>> {
        match self.by_name.get(&name.to_lowercase()).map(Vec::as_slice) {
            Some([only]) => Ok(self.by_path.get(only)),
            Some(many) if many.len() > 1 => Err(many.to_vec()),
            _ => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{AssetMap, AssetRecord, TreeAssetIndex};
    use std::path::PathBuf;

    fn record(hash: &str, ext: &str) -> AssetRecord {
        AssetRecord {
            hash: hash.to_string(),
            extension: ext.to_string(),
            relative_path: format!("{}/{hash}.{ext}", &hash[..2]),
            absolute_path: PathBuf::from(format!("/assets/{}/{hash}.{ext}", &hash[..2])),
        }
    }

    #[test]
    fn first_insert_wins_and_lookup_ignores_case() {
        let mut map = AssetMap::new();
        map.insert(record("abcd", "png"));
        map.insert(record("abcd", "jpg"));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("ABCD").map(|r| r.extension.as_str()), Some("png"));
    }

    #[test]
    fn tree_index_resolves_paths_and_unique_names() {
        let mut index = TreeAssetIndex::new();
        index.insert("img/Logo.png", record("aa11", "png"));
        index.insert("a/pic.jpg", record("bb22", "jpg"));
        index.insert("b/pic.jpg", record("cc33", "jpg"));

        assert_eq!(index.by_path("IMG/logo.png").map(|r| r.hash.as_str()), Some("aa11"));
        assert_eq!(
            index.by_name("logo.png").unwrap().map(|r| r.hash.as_str()),
            Some("aa11")
        );
        assert_eq!(
            index.by_name("pic.jpg").unwrap_err(),
            vec!["a/pic.jpg".to_string(), "b/pic.jpg".to_string()]
        );
        assert!(index.by_name("none.gif").unwrap().is_none());
    }
}
