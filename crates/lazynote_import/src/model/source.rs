//! Source kinds and scan summaries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Foreign source variants understood by the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Legacy application directory: SQLite store, update logs, resource cache.
    Legacy,
    /// Directory tree of HTML files.
    Html,
    /// Directory tree of Markdown files.
    Markdown,
    /// Directory tree of plain-text files.
    PlainText,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Html => "html",
            Self::Markdown => "markdown",
            Self::PlainText => "plain_text",
        }
    }

    /// Parses a CLI/config spelling of the kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy" => Some(Self::Legacy),
            "html" => Some(Self::Html),
            "markdown" | "md" => Some(Self::Markdown),
            "plain_text" | "text" | "txt" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn is_tree(self) -> bool {
        !matches!(self, Self::Legacy)
    }

    /// Lowercase file extensions treated as note files for tree kinds.
    pub fn note_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Legacy => &[],
            Self::Html => &["html", "htm"],
            Self::Markdown => &["md", "markdown"],
            Self::PlainText => &["txt"],
        }
    }
}

/// Sub-paths a scan located (or fell back to) under the source root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredPaths {
    /// Primary SQLite store (legacy only).
    pub store: Option<PathBuf>,
    /// Directory holding per-note update logs (legacy only).
    pub documents: Option<PathBuf>,
    /// Resource cache roots probed in order (legacy only).
    pub resource_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    pub notes: u64,
    pub notebooks: u64,
    pub stacks: u64,
    pub tags: u64,
    pub note_tags: u64,
    pub attachments: u64,
    pub images: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSizes {
    pub store: u64,
    pub documents: u64,
    pub resources: u64,
    /// Sum of active attachment `size` columns (legacy only).
    pub attachments: u64,
    /// Note file bytes (tree only).
    pub notes: u64,
    /// Asset file bytes (tree only).
    pub assets: u64,
}

/// Read-only description of a candidate source root.
///
/// Built once per scan and never mutated afterward; rescanning builds a new
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub source_root: PathBuf,
    pub kind: SourceKind,
    pub required_paths: RequiredPaths,
    pub counts: SourceCounts,
    pub byte_sizes: ByteSizes,
    /// Active attachments with no file in any resource root (legacy only).
    pub missing_count: u64,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SourceSummary {
    pub(crate) fn invalid(source_root: PathBuf, kind: SourceKind, error: String) -> Self {
        Self {
            source_root,
            kind,
            required_paths: RequiredPaths::default(),
            counts: SourceCounts::default(),
            byte_sizes: ByteSizes::default(),
            missing_count: 0,
            valid: false,
            errors: vec![error],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SourceKind;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(SourceKind::parse(" MD "), Some(SourceKind::Markdown));
        assert_eq!(SourceKind::parse("text"), Some(SourceKind::PlainText));
        assert_eq!(SourceKind::parse("legacy"), Some(SourceKind::Legacy));
        assert_eq!(SourceKind::parse("pdf"), None);
    }

    #[test]
    fn legacy_has_no_note_extensions() {
        assert!(SourceKind::Legacy.note_extensions().is_empty());
        assert!(!SourceKind::Legacy.is_tree());
        assert!(SourceKind::Html.note_extensions().contains(&"htm"));
    }
}
