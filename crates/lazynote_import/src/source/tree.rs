//! Tree-source enumeration and the note link index.
//!
//! # Responsibility
//! - Partition a directory tree into note files and asset files.
//! - Derive notebook/stack grouping from the first one or two path segments.
//! - Build the link index used to resolve note-to-note links.
//!
//! # Invariants
//! - `source_id` is the root-relative path with `/` separators.
//! - Entity ids are UUIDv5 over stable keys, so re-imports produce the same
//!   ids.
//! - A base name shared by several files is never resolved to one of them.

use crate::fs_probe::{list_files_recursive, lowercase_extension, relative_slash_path};
use crate::model::source::SourceKind;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ROOT_NOTEBOOK_FALLBACK: &str = "Imported";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "heic"];

/// Notebook/stack placement derived from a note's directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotebookKey {
    /// `a` or `a/b`; empty for notes at the root.
    pub path: String,
    pub name: String,
    pub stack: Option<String>,
}

impl NotebookKey {
    /// Groups a root-relative note path by its first one or two directories.
    pub fn for_note(source_id: &str, root_name: &str) -> Self {
        let mut dirs = source_id.split('/').collect::<Vec<_>>();
        dirs.pop();
        match dirs.as_slice() {
            [] => Self {
                path: String::new(),
                name: root_name.to_string(),
                stack: None,
            },
            [single] => Self {
                path: (*single).to_string(),
                name: (*single).to_string(),
                stack: None,
            },
            [stack, notebook, ..] => Self {
                path: format!("{stack}/{notebook}"),
                name: (*notebook).to_string(),
                stack: Some((*stack).to_string()),
            },
        }
    }

    pub fn id(&self) -> String {
        stable_id("notebook", &self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFileEntry {
    pub source_id: String,
    /// Destination note id.
    pub note_id: String,
    pub path: PathBuf,
    pub kind: SourceKind,
    pub notebook: NotebookKey,
}

impl NoteFileEntry {
    /// File stem, used as a fallback title.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_id.clone())
    }
}

/// Outcome of looking a link target up in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLookup {
    Found { note_id: String, source_id: String },
    /// Several notes share the alias; lists their source ids.
    Ambiguous(Vec<String>),
    NotFound,
}

/// Lookup from full relative path (without extension) and base name to notes.
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    by_path: HashMap<String, String>,
    by_stem: HashMap<String, Vec<String>>,
    note_ids: HashMap<String, String>,
}

impl LinkIndex {
    pub fn build(entries: &[NoteFileEntry]) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index
                .by_path
                .insert(link_key(&entry.source_id), entry.source_id.clone());
            index
                .by_stem
                .entry(entry.stem().to_lowercase())
                .or_default()
                .push(entry.source_id.clone());
            index
                .note_ids
                .insert(entry.source_id.clone(), entry.note_id.clone());
        }
        for candidates in index.by_stem.values_mut() {
            candidates.sort();
            candidates.dedup();
        }
        index
    }

    /// Resolves a wiki-style alias or a root-relative path.
    pub fn lookup(&self, target: &str) -> LinkLookup {
        let key = link_key(target);
        if key.is_empty() {
            return LinkLookup::NotFound;
        }
        if !key.contains('/') {
            // A bare name shared by several notes is never resolved by path.
            match self.by_stem.get(&key).map(Vec::as_slice) {
                Some([only]) => return self.found(only),
                Some(many) if many.len() > 1 => return LinkLookup::Ambiguous(many.to_vec()),
                _ => {}
            }
        }
        match self.by_path.get(&key) {
            Some(source_id) => self.found(source_id),
            None => LinkLookup::NotFound,
        }
    }

    /// Resolves an exact root-relative source path.
    pub fn lookup_source(&self, source_id: &str) -> LinkLookup {
        match self.by_path.get(&link_key(source_id)) {
            Some(found) => self.found(found),
            None => LinkLookup::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.note_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.note_ids.is_empty()
    }

    fn found(&self, source_id: &str) -> LinkLookup {
        match self.note_ids.get(source_id) {
            Some(note_id) => LinkLookup::Found {
                note_id: note_id.clone(),
                source_id: source_id.to_string(),
            },
            None => LinkLookup::NotFound,
        }
    }
}

/// Stack/notebook tables for the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNotebook {
    pub id: String,
    pub name: String,
    pub stack_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStack {
    pub id: String,
    pub name: String,
}

/// Everything enumerated from one tree source.
#[derive(Debug, Default)]
pub struct TreeExtraction {
    pub notes: Vec<NoteFileEntry>,
    pub assets: Vec<PathBuf>,
    pub notebooks: Vec<TreeNotebook>,
    pub stacks: Vec<TreeStack>,
    pub link_index: LinkIndex,
    pub errors: Vec<String>,
}

/// Walks `root` and enumerates note files for `kind`.
pub fn extract_tree(root: &Path, kind: SourceKind) -> TreeExtraction {
    let listing = list_files_recursive(root);
    let root_name = root_display_name(root);
    let mut out = TreeExtraction {
        errors: listing.errors,
        ..TreeExtraction::default()
    };

    let mut notebooks = BTreeMap::new();
    for path in listing.files {
        if !is_note_file(&path, kind) {
            out.assets.push(path);
            continue;
        }
        let Some(source_id) = relative_slash_path(root, &path) else {
            continue;
        };
        let notebook = NotebookKey::for_note(&source_id, &root_name);
        notebooks.insert(notebook.path.clone(), notebook.clone());
        out.notes.push(NoteFileEntry {
            note_id: stable_id("note", &source_id),
            source_id,
            path,
            kind,
            notebook,
        });
    }

    let mut stacks = BTreeMap::new();
    for key in notebooks.values() {
        let stack_id = key.stack.as_ref().map(|stack| {
            let id = stable_id("stack", stack);
            stacks.insert(id.clone(), stack.clone());
            id
        });
        out.notebooks.push(TreeNotebook {
            id: key.id(),
            name: key.name.clone(),
            stack_id,
        });
    }
    out.stacks = stacks
        .into_iter()
        .map(|(id, name)| TreeStack { id, name })
        .collect();
    out.link_index = LinkIndex::build(&out.notes);
    out
}

pub fn is_note_file(path: &Path, kind: SourceKind) -> bool {
    lowercase_extension(path)
        .map(|ext| kind.note_extensions().contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_image_file(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Deterministic id for a tree-derived entity.
pub fn stable_id(namespace: &str, key: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("lazynote-import:{namespace}:{key}").as_bytes(),
    )
    .to_string()
}

fn root_display_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| ROOT_NOTEBOOK_FALLBACK.to_string())
}

/// Normalized lookup key: lowercase, `/` separators, no leading `./` or `/`,
/// no anchor, no note extension.
fn link_key(target: &str) -> String {
    let without_anchor = target.split('#').next().unwrap_or("");
    let mut key = without_anchor.trim().replace('\\', "/").to_lowercase();
    while let Some(rest) = key.strip_prefix("./") {
        key = rest.to_string();
    }
    let key = key.trim_start_matches('/');
    for ext in [".markdown", ".html", ".htm", ".md", ".txt"] {
        if let Some(stripped) = key.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::{LinkIndex, LinkLookup, NotebookKey, NoteFileEntry};
    use crate::model::source::SourceKind;
    use std::path::PathBuf;

    fn entry(source_id: &str) -> NoteFileEntry {
        NoteFileEntry {
            source_id: source_id.to_string(),
            note_id: format!("id-{source_id}"),
            path: PathBuf::from("/root").join(source_id),
            kind: SourceKind::Markdown,
            notebook: NotebookKey::for_note(source_id, "root"),
        }
    }

    #[test]
    fn notebook_key_groups_by_first_two_segments() {
        let root = NotebookKey::for_note("a.md", "Vault");
        assert_eq!(root.name, "Vault");
        assert_eq!(root.stack, None);

        let single = NotebookKey::for_note("Work/a.md", "Vault");
        assert_eq!(single.name, "Work");
        assert_eq!(single.stack, None);

        let nested = NotebookKey::for_note("Work/Projects/deep/a.md", "Vault");
        assert_eq!(nested.path, "Work/Projects");
        assert_eq!(nested.name, "Projects");
        assert_eq!(nested.stack.as_deref(), Some("Work"));
    }

    #[test]
    fn lookup_resolves_unique_stems_and_full_paths() {
        let index = LinkIndex::build(&[entry("a/Alpha.md"), entry("b/Beta.md")]);

        assert!(matches!(index.lookup("alpha"), LinkLookup::Found { .. }));
        assert!(matches!(index.lookup("b/Beta.md"), LinkLookup::Found { .. }));
        assert!(matches!(index.lookup("./b/beta#section"), LinkLookup::Found { .. }));
        assert_eq!(index.lookup("gamma"), LinkLookup::NotFound);
    }

    #[test]
    fn bare_name_shared_with_a_root_note_is_ambiguous() {
        let index = LinkIndex::build(&[entry("Plan.md"), entry("sub/Plan.md")]);

        assert_eq!(
            index.lookup("Plan"),
            LinkLookup::Ambiguous(vec!["Plan.md".to_string(), "sub/Plan.md".to_string()])
        );
        assert_eq!(
            index.lookup("sub/Plan"),
            LinkLookup::Found {
                note_id: "id-sub/Plan.md".to_string(),
                source_id: "sub/Plan.md".to_string(),
            }
        );
        assert_eq!(index.lookup_source("Plan.md"), index.lookup_source("./Plan.md"));
    }

    #[test]
    fn shared_stem_is_ambiguous_but_full_path_still_resolves() {
        let index = LinkIndex::build(&[entry("a/Plan.md"), entry("b/Plan.md")]);

        assert_eq!(
            index.lookup("Plan"),
            LinkLookup::Ambiguous(vec!["a/Plan.md".to_string(), "b/Plan.md".to_string()])
        );
        assert!(matches!(index.lookup("a/Plan"), LinkLookup::Found { .. }));
    }
}
