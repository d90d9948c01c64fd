//! JSON package handed to the destination store.

use crate::model::asset::AttachmentRecord;
use crate::model::note::NormalizedNote;
use crate::model::source::SourceKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const PACKAGE_FILE_NAME: &str = "import_package.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStack {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageNotebook {
    pub id: String,
    pub name: String,
    pub stack_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageTag {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// A normalized note plus its destination id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageNote {
    pub id: String,
    #[serde(flatten)]
    pub note: NormalizedNote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPackage {
    pub source_kind: SourceKind,
    pub stacks: Vec<PackageStack>,
    pub notebooks: Vec<PackageNotebook>,
    pub tags: Vec<PackageTag>,
    pub notes: Vec<PackageNote>,
    pub attachments: Vec<AttachmentRecord>,
}

impl ImportPackage {
    pub fn new(source_kind: SourceKind) -> Self {
        Self {
            source_kind,
            stacks: Vec::new(),
            notebooks: Vec::new(),
            tags: Vec::new(),
            notes: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Serializes into `dir` and returns the JSON text alongside the path.
    pub fn write_to(&self, dir: &Path) -> io::Result<(PathBuf, String)> {
        let json = self.to_json()?;
        let path = dir.join(PACKAGE_FILE_NAME);
        fs::write(&path, &json)?;
        Ok((path, json))
    }
}
