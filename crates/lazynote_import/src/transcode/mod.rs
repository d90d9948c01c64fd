//! Per-note content transformation.
//!
//! # Responsibility
//! - Decode legacy update logs and render tree-source dialects.
//! - Normalize markup into canonical HTML and hash it.
//!
//! # Invariants
//! - `content_hash` is computed over the exact bytes that get persisted.
//! - Normalization is deterministic for equal inputs.

pub mod cleanup;
pub mod crdt;
pub mod enml;
pub mod html;
pub mod links;
pub mod markdown;
pub mod markup;
pub mod text;

use crate::digest::sha256_hex;
use crate::model::asset::AssetMap;
use crate::model::note::{DecodedNote, NormalizedNote};
use crate::model::source::SourceKind;
use enml::{normalize_enml, EnmlOptions};
use links::TargetResolver;

/// Lowercase hex SHA-256 of canonical HTML.
pub fn content_hash(canonical_html: &str) -> String {
    sha256_hex(canonical_html.as_bytes())
}

/// Destination-side references carried onto a normalized note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteRefs {
    pub notebook_ref: Option<String>,
    pub tag_refs: Vec<String>,
}

/// Canonical form of a decoded legacy note.
pub fn normalize_legacy(
    decoded: DecodedNote,
    refs: NoteRefs,
    assets: &AssetMap,
    options: EnmlOptions,
) -> NormalizedNote {
    let html = normalize_enml(&decoded.raw_markup, assets, options);
    finish(decoded, None, html, refs)
}

/// Canonical form of a tree-source note; `decoded.title` is the fallback
/// when the document carries no title of its own.
pub fn normalize_tree(
    decoded: DecodedNote,
    kind: SourceKind,
    refs: NoteRefs,
    resolver: &mut dyn TargetResolver,
    options: EnmlOptions,
) -> NormalizedNote {
    let (title, html) = match kind {
        SourceKind::Html => {
            let doc = html::render_html(&decoded.raw_markup, resolver, options.collapse_breaks);
            (doc.title, doc.html)
        }
        SourceKind::Markdown => {
            let doc = markdown::render_markdown(&decoded.raw_markup, resolver);
            (doc.title, doc.html)
        }
        SourceKind::PlainText => (None, text::render_plain_text(&decoded.raw_markup, resolver)),
        SourceKind::Legacy => (
            None,
            normalize_enml(&decoded.raw_markup, &AssetMap::new(), options),
        ),
    };
    finish(decoded, title, html, refs)
}

fn finish(
    decoded: DecodedNote,
    title: Option<String>,
    canonical_html: String,
    refs: NoteRefs,
) -> NormalizedNote {
    let title = title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or(decoded.title);
    NormalizedNote {
        source_id: decoded.source_id,
        title,
        content_hash: content_hash(&canonical_html),
        content_byte_size: canonical_html.len() as u64,
        canonical_html,
        notebook_ref: refs.notebook_ref,
        tag_refs: refs.tag_refs,
        created_at: decoded.created_at,
        updated_at: decoded.updated_at,
        structured_meta: decoded.structured_meta,
    }
}

#[cfg(test)]
mod tests {
    use super::{content_hash, normalize_legacy, NoteRefs};
    use crate::model::asset::AssetMap;
    use crate::model::note::{DecodedNote, StructuredMeta};
    use crate::transcode::enml::EnmlOptions;

    fn decoded(markup: &str) -> DecodedNote {
        DecodedNote {
            source_id: "n1".to_string(),
            title: "Title".to_string(),
            raw_markup: markup.to_string(),
            structured_meta: StructuredMeta::default(),
            created_at: 1,
            updated_at: 2,
        }
    }

    #[test]
    fn hash_and_size_describe_the_persisted_html() {
        let note = normalize_legacy(
            decoded("<en-note><div>caf\u{e9}</div></en-note>"),
            NoteRefs::default(),
            &AssetMap::new(),
            EnmlOptions::default(),
        );
        assert_eq!(note.canonical_html, "<p>caf\u{e9}</p>");
        assert_eq!(note.content_byte_size, 12);
        assert_eq!(note.content_hash, content_hash("<p>caf\u{e9}</p>"));
        assert_eq!(note.content_hash.len(), 64);
    }

    #[test]
    fn equal_input_gives_equal_hash() {
        let run = || {
            normalize_legacy(
                decoded("<div>x</div><div></div>"),
                NoteRefs::default(),
                &AssetMap::new(),
                EnmlOptions::default(),
            )
            .content_hash
        };
        assert_eq!(run(), run());
    }
}
