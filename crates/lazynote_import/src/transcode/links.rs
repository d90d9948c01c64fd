//! Link and image target resolution for tree sources.
//!
//! # Responsibility
//! - Turn a raw `href`/`src`/wiki target into a note link, a placed asset,
//!   an external reference, or nothing.
//! - Record every ambiguity, miss and download failure for the report.
//!
//! # Invariants
//! - An ambiguous base name is never linked.
//! - Internal note links render as `note://<id>`.

use crate::assets::remote::{is_remote_url, FetchError, RemoteFetcher};
use crate::assets::resolver::{infer_extension, place, write_asset};
use crate::digest::sha256_hex;
use crate::model::asset::{AssetRecord, TreeAssetIndex};
use crate::source::tree::{is_note_file, LinkIndex, LinkLookup, NoteFileEntry};
use crate::transcode::markup::{escape_attr, escape_text};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const NOTE_LINK_SCHEME: &str = "note://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Note { note_id: String },
    Asset(AssetRecord),
    /// Left pointing at its original target (remote URL, anchor, data URI).
    External(String),
    /// Could not be resolved; callers render no link.
    Unresolved,
}

/// Resolves targets met while rendering one note.
pub trait TargetResolver {
    fn resolve_link(&mut self, href: &str) -> ResolvedTarget;
    fn resolve_image(&mut self, src: &str) -> ResolvedTarget;
    fn resolve_wiki(&mut self, target: &str) -> ResolvedTarget;
}

/// A local reference that matched no file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTarget {
    pub target: String,
    pub probed: PathBuf,
}

/// Per-note findings of a [`TreeTargetResolver`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkFindings {
    pub errors: Vec<String>,
    pub missing: Vec<MissingTarget>,
    /// `(target, error)` for failed downloads or writes.
    pub asset_errors: Vec<(String, String)>,
    /// Distinct assets the note references, in first-use order.
    pub assets: Vec<AssetRecord>,
}

/// Run-scoped state shared by every note of one tree import.
pub struct TreeLinkContext<'a> {
    pub root: &'a Path,
    pub assets_root: &'a Path,
    pub notes: &'a LinkIndex,
    pub assets: &'a TreeAssetIndex,
    pub fetcher: &'a dyn RemoteFetcher,
    /// Downloaded URLs, so each is fetched once per run.
    pub downloads: HashMap<String, Option<AssetRecord>>,
}

impl<'a> TreeLinkContext<'a> {
    pub fn new(
        root: &'a Path,
        assets_root: &'a Path,
        notes: &'a LinkIndex,
        assets: &'a TreeAssetIndex,
        fetcher: &'a dyn RemoteFetcher,
    ) -> Self {
        Self {
            root,
            assets_root,
            notes,
            assets,
            fetcher,
            downloads: HashMap::new(),
        }
    }

    /// Resolver for one note.
    pub fn for_note<'n>(&'n mut self, note: &'n NoteFileEntry) -> TreeTargetResolver<'n, 'a> {
        TreeTargetResolver {
            context: self,
            note,
            findings: LinkFindings::default(),
        }
    }
}

pub struct TreeTargetResolver<'n, 'a> {
    context: &'n mut TreeLinkContext<'a>,
    note: &'n NoteFileEntry,
    findings: LinkFindings,
}

impl TreeTargetResolver<'_, '_> {
    pub fn into_findings(self) -> LinkFindings {
        self.findings
    }

    fn track(&mut self, target: ResolvedTarget) -> ResolvedTarget {
        if let ResolvedTarget::Asset(record) = &target {
            if !self.findings.assets.iter().any(|seen| seen.hash == record.hash) {
                self.findings.assets.push(record.clone());
            }
        }
        target
    }

    fn note_dir(&self) -> &str {
        self.note
            .source_id
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("")
    }

    fn resolve_local(&mut self, raw: &str, allow_notes: bool) -> ResolvedTarget {
        let decoded = percent_decode(strip_suffixes(raw));
        let Some(relative) = join_relative(self.note_dir(), &decoded) else {
            self.findings
                .errors
                .push(format!("link '{raw}' in {} leaves the source root", self.note.source_id));
            return ResolvedTarget::Unresolved;
        };

        if allow_notes {
            let candidate = Path::new(&relative);
            let lookup = if is_note_file(candidate, self.note.kind)
                || candidate.extension().is_none()
            {
                self.context.notes.lookup_source(&relative)
            } else {
                LinkLookup::NotFound
            };
            if let LinkLookup::Found { note_id, .. } = lookup {
                return ResolvedTarget::Note { note_id };
            }
        }
        if let Some(record) = self.context.assets.by_path(&relative) {
            return ResolvedTarget::Asset(record.clone());
        }

        self.findings.missing.push(MissingTarget {
            target: raw.to_string(),
            probed: self.context.root.join(&relative),
        });
        ResolvedTarget::Unresolved
    }

    fn download(&mut self, url: &str) -> ResolvedTarget {
        if let Some(cached) = self.context.downloads.get(url) {
            return match cached {
                Some(record) => ResolvedTarget::Asset(record.clone()),
                None => ResolvedTarget::External(url.to_string()),
            };
        }

        let outcome = match self.context.fetcher.fetch(url) {
            Err(FetchError::Disabled) => {
                self.context.downloads.insert(url.to_string(), None);
                return ResolvedTarget::External(url.to_string());
            }
            fetched => fetched,
        };
        let outcome = outcome
            .map_err(|err| err.to_string())
            .and_then(|remote| {
                let hash = sha256_hex(&remote.bytes);
                let file_name = url_file_name(url);
                let extension = infer_extension(
                    remote.content_type.as_deref(),
                    file_name.as_deref(),
                    Some(&remote.bytes),
                );
                let record = place(self.context.assets_root, &hash, &extension);
                write_asset(&remote.bytes, &record)
                    .map(|_| record)
                    .map_err(|err| err.to_string())
            });

        match outcome {
            Ok(record) => {
                self.context
                    .downloads
                    .insert(url.to_string(), Some(record.clone()));
                ResolvedTarget::Asset(record)
            }
            Err(error) => {
                self.findings.asset_errors.push((url.to_string(), error));
                self.context.downloads.insert(url.to_string(), None);
                ResolvedTarget::External(url.to_string())
            }
        }
    }
}

impl TargetResolver for TreeTargetResolver<'_, '_> {
    fn resolve_link(&mut self, href: &str) -> ResolvedTarget {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || has_scheme(href) {
            return ResolvedTarget::External(href.to_string());
        }
        let target = self.resolve_local(href, true);
        self.track(target)
    }

    fn resolve_image(&mut self, src: &str) -> ResolvedTarget {
        let src = src.trim();
        if src.is_empty() {
            return ResolvedTarget::Unresolved;
        }
        let target = if is_remote_url(src) {
            self.download(src)
        } else if has_scheme(src) {
            ResolvedTarget::External(src.to_string())
        } else {
            self.resolve_local(src, false)
        };
        self.track(target)
    }

    fn resolve_wiki(&mut self, target: &str) -> ResolvedTarget {
        let target = target.trim();
        match self.context.notes.lookup(target) {
            LinkLookup::Found { note_id, .. } => return ResolvedTarget::Note { note_id },
            LinkLookup::Ambiguous(candidates) => {
                self.findings.errors.push(format!(
                    "ambiguous link '{target}' in {}: matches {}",
                    self.note.source_id,
                    candidates.join(", ")
                ));
                return ResolvedTarget::Unresolved;
            }
            LinkLookup::NotFound => {}
        }

        match self.context.assets.by_name(target) {
            Ok(Some(record)) => {
                let resolved = ResolvedTarget::Asset(record.clone());
                self.track(resolved)
            }
            Ok(None) => {
                self.findings.errors.push(format!(
                    "unresolved link '{target}' in {}",
                    self.note.source_id
                ));
                ResolvedTarget::Unresolved
            }
            Err(candidates) => {
                self.findings.errors.push(format!(
                    "ambiguous link '{target}' in {}: matches {}",
                    self.note.source_id,
                    candidates.join(", ")
                ));
                ResolvedTarget::Unresolved
            }
        }
    }
}

/// Renders a link around already-rendered inner HTML.
pub fn render_link(target: &ResolvedTarget, inner_html: &str) -> String {
    match target {
        ResolvedTarget::Note { note_id } => {
            format!("<a href=\"{NOTE_LINK_SCHEME}{}\">{inner_html}</a>", escape_attr(note_id))
        }
        ResolvedTarget::Asset(record) => {
            format!("<a href=\"{}\">{inner_html}</a>", escape_attr(&record.relative_path))
        }
        ResolvedTarget::External(url) => {
            format!("<a href=\"{}\">{inner_html}</a>", escape_attr(url))
        }
        ResolvedTarget::Unresolved => inner_html.to_string(),
    }
}

/// Renders an image; an unresolved image keeps its original source.
pub fn render_image(target: &ResolvedTarget, original: &str, alt: &str) -> String {
    let src = match target {
        ResolvedTarget::Asset(record) => record.relative_path.as_str(),
        ResolvedTarget::External(url) => url.as_str(),
        ResolvedTarget::Note { .. } | ResolvedTarget::Unresolved => original,
    };
    format!(
        "<img src=\"{}\" alt=\"{}\"/>",
        escape_attr(src),
        escape_attr(alt)
    )
}

/// Renders an embed (`![[...]]`): images inline, anything else as a link.
pub fn render_embed(target: &ResolvedTarget, original: &str, label: &str) -> String {
    match target {
        ResolvedTarget::Asset(record) if is_image_extension(&record.extension) => {
            render_image(target, original, label)
        }
        _ => render_link(target, &escape_text(label)),
    }
}

/// Renders the inside of `[[target|label]]`, or of `![[...]]` when `embed`.
pub fn render_wiki(inner: &str, embed: bool, resolver: &mut dyn TargetResolver) -> String {
    let (target, label) = match inner.split_once('|') {
        Some((target, label)) => (target.trim(), label.trim()),
        None => (inner.trim(), inner.trim()),
    };
    let resolved = resolver.resolve_wiki(target);
    if embed {
        render_embed(&resolved, target, label)
    } else {
        render_link(&resolved, &escape_text(label))
    }
}

/// Byte length of a `[[...]]` or `![[...]]` construct at the start of
/// `text`, with its inner text.
pub fn scan_wiki(text: &str) -> Option<(usize, &str, bool)> {
    let (embed, open) = if text.starts_with("![[") {
        (true, 3)
    } else if text.starts_with("[[") {
        (false, 2)
    } else {
        return None;
    };
    let close = text[open..].find("]]")?;
    let inner = &text[open..open + close];
    if inner.trim().is_empty() || inner.contains('\n') {
        return None;
    }
    Some((open + close + 2, inner, embed))
}

fn is_image_extension(extension: &str) -> bool {
    matches!(
        extension,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" | "heic"
    )
}

fn has_scheme(target: &str) -> bool {
    match target.find(':') {
        Some(colon) => {
            let scheme = &target[..colon];
            colon > 1
                && scheme
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn strip_suffixes(target: &str) -> &str {
    let end = target.find(|ch: char| ch == '?' || ch == '#').unwrap_or(target.len());
    &target[..end]
}

/// Joins `target` onto the root-relative directory `base`, resolving `.`
/// and `..`. Returns `None` when the result would escape the root.
fn join_relative(base: &str, target: &str) -> Option<String> {
    let mut parts = Vec::new();
    let start = if target.starts_with('/') { "" } else { base };
    for segment in start.split('/').chain(target.split(|ch: char| ch == '/' || ch == '\\')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn url_file_name(url: &str) -> Option<String> {
    strip_suffixes(url)
        .rsplit('/')
        .next()
        .filter(|name| name.contains('.'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::{has_scheme, join_relative, percent_decode, render_link, ResolvedTarget};

    #[test]
    fn relative_joins_stay_inside_the_root() {
        assert_eq!(join_relative("a/b", "../c/d.png").as_deref(), Some("a/c/d.png"));
        assert_eq!(join_relative("a", "./x.md").as_deref(), Some("a/x.md"));
        assert_eq!(join_relative("a", "/top.md").as_deref(), Some("top.md"));
        assert_eq!(join_relative("", "../escape.md"), None);
    }

    #[test]
    fn schemes_are_detected() {
        assert!(has_scheme("mailto:me@example.com"));
        assert!(has_scheme("https://example.com"));
        assert!(!has_scheme("C:/windows/path"));
        assert!(!has_scheme("notes/a.md"));
    }

    #[test]
    fn percent_sequences_decode() {
        assert_eq!(percent_decode("My%20Note.md"), "My Note.md");
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn unresolved_links_render_only_their_text() {
        assert_eq!(render_link(&ResolvedTarget::Unresolved, "Plan"), "Plan");
        assert_eq!(
            render_link(
                &ResolvedTarget::Note {
                    note_id: "n1".to_string()
                },
                "Plan"
            ),
            "<a href=\"note://n1\">Plan</a>"
        );
    }
}
