//! Decoded and normalized note records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key-value regions carried alongside note markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredMeta {
    /// Per-note style map (fonts, colors, widths).
    pub style: BTreeMap<String, Value>,
    /// Per-note meta map (source flags, reminders, ...).
    pub meta: BTreeMap<String, Value>,
}

impl StructuredMeta {
    pub fn is_empty(&self) -> bool {
        self.style.is_empty() && self.meta.is_empty()
    }
}

/// One note after decoding, before markup normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedNote {
    pub source_id: String,
    pub title: String,
    /// Source-dialect markup (legacy rich text or HTML/Markdown/text body).
    pub raw_markup: String,
    pub structured_meta: StructuredMeta,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds.
    pub updated_at: i64,
}

/// One note in canonical form, ready for the import package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedNote {
    pub source_id: String,
    pub title: String,
    pub canonical_html: String,
    /// Lowercase hex SHA-256 of `canonical_html` bytes.
    pub content_hash: String,
    pub content_byte_size: u64,
    pub notebook_ref: Option<String>,
    pub tag_refs: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "StructuredMeta::is_empty")]
    pub structured_meta: StructuredMeta,
}
