//! Legacy store row schema and read-only extraction.
//!
//! # Responsibility
//! - Map every source table to an explicit row struct at the boundary.
//! - Pull notebooks, tags, notes, note-tags and attachments without
//!   transforming content.
//!
//! # Invariants
//! - Soft-deleted notes (`deleted > 0`) never enter the working set.
//! - Attachments of excluded notes are returned as skipped, not dropped.
//! - Rows with unexpected nulls in required columns are reported and
//!   skipped; nothing untyped leaves this module.

use crate::db::{list_tables, DbError};
use log::{info, warn};
use rusqlite::{Connection, Row};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Tables the extractor reads. All must exist for a source to be valid.
pub const REQUIRED_TABLES: &[&str] = &["attachments", "note_tags", "notebooks", "notes", "tags"];

/// Prefix token the legacy app puts in front of stack identifiers.
pub const STACK_PREFIX: &str = "Stack:";

const ACTIVE_NOTE_FILTER: &str = "(deleted IS NULL OR deleted = 0)";

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug)]
pub enum ExtractError {
    Db(DbError),
    MissingTable(&'static str),
}

impl Display for ExtractError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingTable(table) => {
                write!(f, "primary store is missing required table `{table}`")
            }
        }
    }
}

impl Error for ExtractError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::MissingTable(_) => None,
        }
    }
}

impl From<DbError> for ExtractError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ExtractError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotebookRow {
    pub id: String,
    pub name: String,
    /// Stack name with the legacy prefix stripped.
    pub stack: Option<String>,
    pub created_at: Option<f64>,
    pub updated_at: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteRow {
    pub id: String,
    pub title: String,
    pub notebook_id: Option<String>,
    pub created_at: Option<f64>,
    pub updated_at: Option<f64>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteTagRow {
    pub note_id: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRow {
    pub id: String,
    pub note_id: String,
    pub data_hash: String,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub size: u64,
    pub active: bool,
}

/// Everything pulled from one legacy store.
#[derive(Debug, Default)]
pub struct LegacyExtraction {
    pub notebooks: Vec<NotebookRow>,
    pub tags: Vec<TagRow>,
    /// Active notes only.
    pub notes: Vec<NoteRow>,
    /// Links whose note is active.
    pub note_tags: Vec<NoteTagRow>,
    /// Attachments whose parent note is active.
    pub attachments: Vec<AttachmentRow>,
    /// Attachments whose parent note was excluded or never existed.
    pub skipped_attachments: Vec<AttachmentRow>,
    pub excluded_notes: usize,
    /// Per-row mapping problems (unexpected nulls).
    pub row_errors: Vec<String>,
}

/// Aggregate figures used by the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyCounts {
    pub notes: u64,
    pub notebooks: u64,
    pub tags: u64,
    pub note_tags: u64,
    pub attachments: u64,
    pub images: u64,
    pub attachment_bytes: u64,
}

/// Strips the stack prefix token; empty stacks become `None`.
pub fn normalize_stack(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    let stripped = trimmed.strip_prefix(STACK_PREFIX).unwrap_or(trimmed).trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Fails when any required table is absent. Also the first read of the file,
/// so a corrupt store surfaces here as [`ExtractError::Db`].
pub fn ensure_required_tables(conn: &Connection) -> ExtractResult<()> {
    let tables = list_tables(conn)?
        .into_iter()
        .map(|name| name.to_ascii_lowercase())
        .collect::<HashSet<_>>();
    for table in REQUIRED_TABLES {
        if !tables.contains(*table) {
            return Err(ExtractError::MissingTable(table));
        }
    }
    Ok(())
}

/// Runs read-only `COUNT`/`SUM` aggregates, excluding soft-deleted notes.
pub fn count_rows(conn: &Connection) -> ExtractResult<LegacyCounts> {
    let count = |sql: &str| -> ExtractResult<u64> {
        let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(value.max(0) as u64)
    };

    let active_attachments = format!(
        "FROM attachments a
         WHERE a.parent_note_id IN (SELECT id FROM notes WHERE {ACTIVE_NOTE_FILTER})"
    );

    Ok(LegacyCounts {
        notes: count(&format!(
            "SELECT COUNT(*) FROM notes WHERE {ACTIVE_NOTE_FILTER}"
        ))?,
        notebooks: count("SELECT COUNT(*) FROM notebooks")?,
        tags: count("SELECT COUNT(*) FROM tags")?,
        note_tags: count(&format!(
            "SELECT COUNT(*) FROM note_tags
             WHERE note_id IN (SELECT id FROM notes WHERE {ACTIVE_NOTE_FILTER})"
        ))?,
        attachments: count(&format!("SELECT COUNT(*) {active_attachments}"))?,
        images: count(&format!(
            "SELECT COUNT(*) {active_attachments} AND lower(a.mime) LIKE 'image/%'"
        ))?,
        attachment_bytes: count(&format!(
            "SELECT COALESCE(SUM(a.data_size), 0) {active_attachments}"
        ))?,
    })
}

/// Deduplicated stack names across all notebooks.
pub fn distinct_stacks(conn: &Connection) -> ExtractResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT stack_id FROM notebooks;")?;
    let mut rows = stmt.query([])?;
    let mut stacks = std::collections::BTreeSet::new();
    while let Some(row) = rows.next()? {
        let raw: Option<String> = row.get(0)?;
        if let Some(stack) = normalize_stack(raw.as_deref()) {
            stacks.insert(stack);
        }
    }
    Ok(stacks.into_iter().collect())
}

/// Pulls every row the pipeline needs.
pub fn extract_legacy(conn: &Connection) -> ExtractResult<LegacyExtraction> {
    ensure_required_tables(conn)?;
    let mut out = LegacyExtraction::default();

    out.notebooks = read_rows(
        conn,
        "SELECT id, label, stack_id, created, updated FROM notebooks ORDER BY id ASC;",
        "notebooks",
        &mut out.row_errors,
        |row| {
            let Some(id) = row.get::<_, Option<String>>("id")? else {
                return Ok(Err("id"));
            };
            let stack: Option<String> = row.get("stack_id")?;
            Ok(Ok(NotebookRow {
                name: row
                    .get::<_, Option<String>>("label")?
                    .unwrap_or_else(|| id.clone()),
                id,
                stack: normalize_stack(stack.as_deref()),
                created_at: row.get("created")?,
                updated_at: row.get("updated")?,
            }))
        },
    )?;

    out.tags = read_rows(
        conn,
        "SELECT id, label, parent_id FROM tags ORDER BY id ASC;",
        "tags",
        &mut out.row_errors,
        |row| {
            let Some(id) = row.get::<_, Option<String>>("id")? else {
                return Ok(Err("id"));
            };
            let Some(name) = row.get::<_, Option<String>>("label")? else {
                return Ok(Err("label"));
            };
            Ok(Ok(TagRow {
                id,
                name,
                parent_id: row.get("parent_id")?,
            }))
        },
    )?;

    let all_notes = read_rows(
        conn,
        "SELECT id, label, notebook_id, created, updated, deleted FROM notes ORDER BY id ASC;",
        "notes",
        &mut out.row_errors,
        |row| {
            let Some(id) = row.get::<_, Option<String>>("id")? else {
                return Ok(Err("id"));
            };
            let deleted = row
                .get::<_, Option<f64>>("deleted")?
                .map(|value| value > 0.0)
                .unwrap_or(false);
            Ok(Ok(NoteRow {
                id,
                title: row.get::<_, Option<String>>("label")?.unwrap_or_default(),
                notebook_id: row.get("notebook_id")?,
                created_at: row.get("created")?,
                updated_at: row.get("updated")?,
                deleted,
            }))
        },
    )?;

    let (active, excluded): (Vec<_>, Vec<_>) = all_notes.into_iter().partition(|note| !note.deleted);
    out.excluded_notes = excluded.len();
    out.notes = active;
    let active_ids = out
        .notes
        .iter()
        .map(|note| note.id.clone())
        .collect::<HashSet<_>>();

    let note_tags = read_rows(
        conn,
        "SELECT note_id, tag_id FROM note_tags ORDER BY note_id ASC, tag_id ASC;",
        "note_tags",
        &mut out.row_errors,
        |row| {
            let Some(note_id) = row.get::<_, Option<String>>("note_id")? else {
                return Ok(Err("note_id"));
            };
            let Some(tag_id) = row.get::<_, Option<String>>("tag_id")? else {
                return Ok(Err("tag_id"));
            };
            Ok(Ok(NoteTagRow { note_id, tag_id }))
        },
    )?;
    out.note_tags = note_tags
        .into_iter()
        .filter(|link| active_ids.contains(&link.note_id))
        .collect();

    let attachments = read_rows(
        conn,
        "SELECT id, parent_note_id, data_hash, filename, mime, data_size, is_active
         FROM attachments
         ORDER BY parent_note_id ASC, id ASC;",
        "attachments",
        &mut out.row_errors,
        |row| {
            let Some(id) = row.get::<_, Option<String>>("id")? else {
                return Ok(Err("id"));
            };
            let Some(note_id) = row.get::<_, Option<String>>("parent_note_id")? else {
                return Ok(Err("parent_note_id"));
            };
            let Some(data_hash) = row.get::<_, Option<String>>("data_hash")? else {
                return Ok(Err("data_hash"));
            };
            Ok(Ok(AttachmentRow {
                id,
                note_id,
                data_hash: data_hash.trim().to_ascii_lowercase(),
                filename: row.get("filename")?,
                mime: row.get("mime")?,
                size: row.get::<_, Option<i64>>("data_size")?.unwrap_or(0).max(0) as u64,
                active: row.get::<_, Option<i64>>("is_active")?.unwrap_or(1) != 0,
            }))
        },
    )?;
    for attachment in attachments {
        if active_ids.contains(&attachment.note_id) {
            out.attachments.push(attachment);
        } else {
            out.skipped_attachments.push(attachment);
        }
    }

    info!(
        "event=legacy_extract module=source status=ok notebooks={} tags={} notes={} excluded_notes={} attachments={} skipped_attachments={} row_errors={}",
        out.notebooks.len(),
        out.tags.len(),
        out.notes.len(),
        out.excluded_notes,
        out.attachments.len(),
        out.skipped_attachments.len(),
        out.row_errors.len()
    );
    Ok(out)
}

/// Reads one table. `map` returns `Ok(Err(column))` for a row with an
/// unexpected null; such rows are reported and skipped.
fn read_rows<T>(
    conn: &Connection,
    sql: &str,
    table: &str,
    row_errors: &mut Vec<String>,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<Result<T, &'static str>>,
) -> ExtractResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    let mut index = 0usize;
    while let Some(row) = rows.next()? {
        match map(row)? {
            Ok(value) => out.push(value),
            Err(column) => {
                warn!(
                    "event=legacy_row_rejected module=source status=error table={} row={} column={}",
                    table, index, column
                );
                row_errors.push(format!(
                    "{table} row {index}: unexpected null in required column `{column}`"
                ));
            }
        }
        index += 1;
    }
    Ok(out)
}
