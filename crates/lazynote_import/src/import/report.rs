//! Structured import report.
//!
//! # Invariants
//! - One report per run, written to `<backup_dir>/import_report.json`.
//! - Per-item failures land in their own list and never flip `failed`.

use crate::destination::ImportCounts;
use crate::model::source::SourceSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const REPORT_FILE_NAME: &str = "import_report.json";

/// A referenced resource that no candidate location held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingResource {
    pub note_id: String,
    /// Attachment hash (legacy) or link target (tree).
    pub reference: String,
    pub filename: Option<String>,
    pub probed_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeFailure {
    pub note_id: String,
    pub title: String,
    /// Whether a document file was located at all.
    pub found: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCopyError {
    pub note_id: Option<String>,
    pub reference: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub notes_seen: u64,
    pub notes_prepared: u64,
    pub excluded_notes: u64,
    pub attachments_copied: u64,
    pub attachments_reused: u64,
    pub attachments_missing: u64,
    pub attachments_failed: u64,
    pub attachments_inactive: u64,
    pub attachments_skipped: u64,
    pub remote_downloads: u64,
    pub duration_ms: u64,
    /// Rows persisted by the destination; absent when the write never ran.
    pub written: Option<ImportCounts>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub source_root: PathBuf,
    pub backup_dir: PathBuf,
    pub failed: bool,
    pub summary: SourceSummary,
    pub stats: ImportStats,
    pub missing_resources: Vec<MissingResource>,
    pub decode_errors: Vec<DecodeFailure>,
    pub asset_copy_errors: Vec<AssetCopyError>,
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn new(started_at: DateTime<Utc>, summary: SourceSummary, backup_dir: PathBuf) -> Self {
        Self {
            started_at,
            finished_at: None,
            source_root: summary.source_root.clone(),
            backup_dir,
            failed: false,
            summary,
            stats: ImportStats::default(),
            missing_resources: Vec::new(),
            decode_errors: Vec::new(),
            asset_copy_errors: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Records a stage-level failure.
    pub fn fail(&mut self, message: String) {
        self.failed = true;
        self.errors.push(message);
    }

    /// Writes the report as pretty JSON into `dir`.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(REPORT_FILE_NAME);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeFailure, ImportReport, REPORT_FILE_NAME};
    use crate::model::source::{SourceKind, SourceSummary};
    use chrono::Utc;
    use serde_json::Value;
    use std::path::PathBuf;

    fn summary() -> SourceSummary {
        SourceSummary::invalid(PathBuf::from("/src"), SourceKind::Markdown, "x".to_string())
    }

    #[test]
    fn fields_serialize_in_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ImportReport::new(Utc::now(), summary(), dir.path().to_path_buf());
        report.decode_errors.push(DecodeFailure {
            note_id: "n1".to_string(),
            title: "T".to_string(),
            found: false,
            error: "update log not found".to_string(),
        });
        report.fail("write failed".to_string());

        let path = report.write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(REPORT_FILE_NAME));

        let json: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["failed"], Value::Bool(true));
        assert_eq!(json["decodeErrors"][0]["noteId"], "n1");
        assert!(json["startedAt"].as_str().unwrap().contains('T'));
        assert!(json.get("missingResources").is_some());
        assert!(json.get("assetCopyErrors").is_some());
        assert_eq!(json["summary"]["valid"], Value::Bool(false));
    }
}
