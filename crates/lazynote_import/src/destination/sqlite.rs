//! Reference destination store over a migrated SQLite file.
//!
//! # Responsibility
//! - Ingest an import package, replacing prior content in one transaction.
//! - Back up with `VACUUM INTO` and restore by attaching the backup.
//! - Keep an FTS5 index over note plain text.
//!
//! # Invariants
//! - References to unknown notebooks, stacks or tags are dropped, never
//!   invented.
//! - The search index is derived data; `backfill` rebuilds it from `notes`.

use super::{DestinationError, DestinationResult, DestinationStore, ImportCounts};
use crate::db::{open_destination_db, open_destination_db_in_memory, DbError};
use crate::import::package::ImportPackage;
use crate::transcode::markup::plain_text;
use log::{error, info};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const BACKUP_FILE_NAME: &str = "destination_backup.sqlite3";

const BACKUP_SCHEMA: &str = "import_backup";
const CONTENT_TABLES: &[&str] = &["stacks", "notebooks", "tags", "notes", "note_tags", "attachments"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub note_id: String,
    pub title: String,
    pub snippet: String,
}

pub struct SqliteDestination {
    conn: Connection,
}

impl SqliteDestination {
    pub fn open(path: impl AsRef<Path>) -> DestinationResult<Self> {
        Ok(Self {
            conn: open_destination_db(path)?,
        })
    }

    pub fn open_in_memory() -> DestinationResult<Self> {
        Ok(Self {
            conn: open_destination_db_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Keyword search over imported notes; every term must match.
    ///
    /// Returns an empty list for blank queries.
    pub fn search(&self, text: &str, limit: u32) -> DestinationResult<Vec<SearchHit>> {
        let Some(match_expr) = build_match_expression(text) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT note_id, title, snippet(notes_fts, 2, '[', ']', ' ... ', 10)
             FROM notes_fts
             WHERE notes_fts MATCH ?1
             ORDER BY bm25(notes_fts), note_id ASC
             LIMIT ?2;",
        )?;
        let mut rows = stmt
            .query(params![match_expr, i64::from(limit)])
            .map_err(|err| map_query_error(err, &match_expr))?;
        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| map_query_error(err, &match_expr))?
        {
            hits.push(SearchHit {
                note_id: row.get(0)?,
                title: row.get(1)?,
                snippet: row.get(2)?,
            });
        }
        Ok(hits)
    }

    fn restore_from(&mut self, backup_file: &Path) -> DestinationResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        clear_content(&tx)?;
        for table in CONTENT_TABLES {
            tx.execute(
                &format!("INSERT INTO main.{table} SELECT * FROM {BACKUP_SCHEMA}.{table};"),
                [],
            )?;
        }
        tx.commit()?;
        info!(
            "event=destination_restore module=destination status=ok backup={}",
            backup_file.display()
        );
        Ok(())
    }
}

impl DestinationStore for SqliteDestination {
    fn has_existing_data(&self) -> DestinationResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notes) OR EXISTS(SELECT 1 FROM notebooks);",
            [],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn backup(&self, dir: &Path) -> DestinationResult<PathBuf> {
        let started_at = Instant::now();
        fs::create_dir_all(dir).map_err(|err| DestinationError::Io {
            path: dir.to_path_buf(),
            source: err,
        })?;
        let target = dir.join(BACKUP_FILE_NAME);
        if target.exists() {
            fs::remove_file(&target).map_err(|err| DestinationError::Io {
                path: target.clone(),
                source: err,
            })?;
        }

        if let Err(err) = self.conn.execute(
            "VACUUM INTO ?1;",
            params![target.to_string_lossy().into_owned()],
        ) {
            error!(
                "event=destination_backup module=destination status=error error_code=vacuum_failed error={}",
                err
            );
            return Err(err.into());
        }
        info!(
            "event=destination_backup module=destination status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(dir.to_path_buf())
    }

    fn import_from_json(
        &mut self,
        package_json: &str,
        assets_dir: &Path,
    ) -> DestinationResult<ImportCounts> {
        let started_at = Instant::now();
        let package = ImportPackage::from_json(package_json)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        clear_content(&tx)?;
        let counts = insert_package(&tx, &package, assets_dir)?;
        tx.commit()?;

        info!(
            "event=destination_import module=destination status=ok notebooks={} tags={} notes={} attachments={} duration_ms={}",
            counts.notebooks,
            counts.tags,
            counts.notes,
            counts.attachments,
            started_at.elapsed().as_millis()
        );
        Ok(counts)
    }

    fn backfill(&mut self) -> DestinationResult<()> {
        let started_at = Instant::now();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM notes_fts;", [])?;
        let mut indexed = 0u64;
        {
            let mut select = tx.prepare("SELECT id, title, html FROM notes ORDER BY id ASC;")?;
            let mut insert =
                tx.prepare("INSERT INTO notes_fts (note_id, title, body) VALUES (?1, ?2, ?3);")?;
            let mut rows = select.query([])?;
            while let Some(row) = rows.next()? {
                let note_id: String = row.get(0)?;
                let title: String = row.get(1)?;
                let html: String = row.get(2)?;
                let body = plain_text(&html)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                insert.execute(params![note_id, title, body])?;
                indexed += 1;
            }
        }
        tx.commit()?;
        info!(
            "event=destination_backfill module=destination status=ok indexed={} duration_ms={}",
            indexed,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn restore(&mut self, backup_dir: &Path) -> DestinationResult<()> {
        let backup_file = backup_dir.join(BACKUP_FILE_NAME);
        if !backup_file.is_file() {
            return Err(DestinationError::BackupMissing(backup_file));
        }

        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {BACKUP_SCHEMA};"),
            params![backup_file.to_string_lossy().into_owned()],
        )?;
        let restored = self.restore_from(&backup_file);
        let detached = self
            .conn
            .execute_batch(&format!("DETACH DATABASE {BACKUP_SCHEMA};"));
        restored?;
        detached?;
        self.backfill()
    }
}

fn clear_content(tx: &Transaction<'_>) -> DestinationResult<()> {
    tx.execute_batch(
        "DELETE FROM note_tags;
         DELETE FROM attachments;
         DELETE FROM notes;
         DELETE FROM notebooks;
         DELETE FROM tags;
         DELETE FROM stacks;
         DELETE FROM notes_fts;",
    )?;
    Ok(())
}

fn insert_package(
    tx: &Transaction<'_>,
    package: &ImportPackage,
    assets_dir: &Path,
) -> DestinationResult<ImportCounts> {
    let mut counts = ImportCounts::default();

    let mut stack_ids = HashSet::new();
    for stack in &package.stacks {
        tx.execute(
            "INSERT OR REPLACE INTO stacks (id, name) VALUES (?1, ?2);",
            params![stack.id, stack.name],
        )?;
        if stack_ids.insert(stack.id.as_str()) {
            counts.stacks += 1;
        }
    }

    let mut notebook_ids = HashSet::new();
    for notebook in &package.notebooks {
        let stack_id = notebook
            .stack_id
            .as_deref()
            .filter(|id| stack_ids.contains(id));
        tx.execute(
            "INSERT OR REPLACE INTO notebooks (id, name, stack_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                notebook.id,
                notebook.name,
                stack_id,
                notebook.created_at,
                notebook.updated_at
            ],
        )?;
        if notebook_ids.insert(notebook.id.as_str()) {
            counts.notebooks += 1;
        }
    }

    let mut tag_ids = HashSet::new();
    for tag in &package.tags {
        tx.execute(
            "INSERT OR REPLACE INTO tags (id, name, parent_id) VALUES (?1, ?2, ?3);",
            params![tag.id, tag.name, tag.parent_id],
        )?;
        if tag_ids.insert(tag.id.as_str()) {
            counts.tags += 1;
        }
    }

    let mut note_ids = HashMap::new();
    for entry in &package.notes {
        let note = &entry.note;
        let notebook_id = note
            .notebook_ref
            .as_deref()
            .filter(|id| notebook_ids.contains(id));
        let meta_json = if note.structured_meta.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&note.structured_meta)?)
        };
        tx.execute(
            "INSERT OR REPLACE INTO notes
                (id, title, notebook_id, html, content_hash, content_size, created_at, updated_at, meta_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                entry.id,
                note.title,
                notebook_id,
                note.canonical_html,
                note.content_hash,
                i64::try_from(note.content_byte_size).unwrap_or(i64::MAX),
                note.created_at,
                note.updated_at,
                meta_json
            ],
        )?;
        if note_ids
            .insert(note.source_id.as_str(), entry.id.as_str())
            .is_none()
        {
            counts.notes += 1;
        }

        for tag_id in note.tag_refs.iter().filter(|id| tag_ids.contains(id.as_str())) {
            counts.note_tags += tx.execute(
                "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2);",
                params![entry.id, tag_id],
            )? as u64;
        }
    }

    for attachment in &package.attachments {
        let note_id = note_ids
            .get(attachment.note_source_id.as_str())
            .copied()
            .unwrap_or(attachment.note_source_id.as_str());
        let local_path = attachment.local_file.as_ref().map(|record| {
            assets_dir
                .join(&record.relative_path)
                .to_string_lossy()
                .into_owned()
        });
        tx.execute(
            "INSERT INTO attachments (note_id, data_hash, filename, mime, size, local_path, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                note_id,
                attachment.data_hash,
                attachment.filename,
                attachment.mime,
                i64::try_from(attachment.size).unwrap_or(i64::MAX),
                local_path,
                attachment.status.as_str()
            ],
        )?;
        counts.attachments += 1;
    }

    Ok(counts)
}

fn build_match_expression(text: &str) -> Option<String> {
    let terms = text
        .split_whitespace()
        .map(escape_fts_term)
        .collect::<Vec<_>>();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

fn map_query_error(err: rusqlite::Error, query: &str) -> DestinationError {
    if is_match_syntax_error(&err) {
        return DestinationError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }
    DestinationError::Db(DbError::Sqlite(err))
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_match_expression, SqliteDestination, BACKUP_FILE_NAME};
    use crate::destination::{DestinationError, DestinationStore};
    use crate::import::package::{
        ImportPackage, PackageNote, PackageNotebook, PackageStack, PackageTag,
    };
    use crate::model::asset::{AssetRecord, AttachmentRecord, AttachmentStatus};
    use crate::model::note::{NormalizedNote, StructuredMeta};
    use crate::model::source::SourceKind;
    use crate::transcode::content_hash;
    use std::path::{Path, PathBuf};

    fn note(id: &str, title: &str, html: &str) -> PackageNote {
        PackageNote {
            id: id.to_string(),
            note: NormalizedNote {
                source_id: format!("src-{id}"),
                title: title.to_string(),
                canonical_html: html.to_string(),
                content_hash: content_hash(html),
                content_byte_size: html.len() as u64,
                notebook_ref: Some("nb1".to_string()),
                tag_refs: vec!["t1".to_string(), "unknown".to_string()],
                created_at: 1_700_000_000,
                updated_at: 1_700_000_100,
                structured_meta: StructuredMeta::default(),
            },
        }
    }

    fn package() -> ImportPackage {
        let mut package = ImportPackage::new(SourceKind::Legacy);
        package.stacks.push(PackageStack {
            id: "s1".to_string(),
            name: "Work".to_string(),
        });
        package.notebooks.push(PackageNotebook {
            id: "nb1".to_string(),
            name: "Projects".to_string(),
            stack_id: Some("s1".to_string()),
            created_at: 1,
            updated_at: 2,
        });
        package.tags.push(PackageTag {
            id: "t1".to_string(),
            name: "alpha".to_string(),
            parent_id: None,
        });
        package
            .notes
            .push(note("n1", "Garden plan", "<p>Plant <b>tomatoes</b> in May</p>"));
        package
            .notes
            .push(note("n2", "Reading", "<p>Finish the novel</p>"));
        package.attachments.push(AttachmentRecord {
            note_source_id: "src-n1".to_string(),
            data_hash: "abcd".to_string(),
            filename: Some("plot.png".to_string()),
            mime: Some("image/png".to_string()),
            size: 4,
            local_file: Some(AssetRecord {
                hash: "abcd".to_string(),
                extension: "png".to_string(),
                relative_path: "ab/abcd.png".to_string(),
                absolute_path: PathBuf::from("/assets/ab/abcd.png"),
            }),
            status: AttachmentStatus::Copied,
        });
        package
    }

    #[test]
    fn import_replaces_content_and_drops_unknown_refs() {
        let mut store = SqliteDestination::open_in_memory().unwrap();
        assert!(!store.has_existing_data().unwrap());

        let json = package().to_json().unwrap();
        let counts = store.import_from_json(&json, Path::new("/assets")).unwrap();
        assert_eq!(counts.notes, 2);
        assert_eq!(counts.note_tags, 2);
        assert_eq!(counts.attachments, 1);
        assert!(store.has_existing_data().unwrap());

        let counts = store.import_from_json(&json, Path::new("/assets")).unwrap();
        assert_eq!(counts.notes, 2);
        let total: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM notes;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 2);

        let (note_id, local_path): (String, String) = store
            .connection()
            .query_row("SELECT note_id, local_path FROM attachments;", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(note_id, "n1");
        assert_eq!(PathBuf::from(local_path), Path::new("/assets").join("ab/abcd.png"));
    }

    #[test]
    fn invalid_package_is_rejected_without_changes() {
        let mut store = SqliteDestination::open_in_memory().unwrap();
        let error = store
            .import_from_json("{not json", Path::new("/assets"))
            .unwrap_err();
        assert!(matches!(error, DestinationError::Package(_)));
    }

    #[test]
    fn backfill_indexes_plain_text_for_search() {
        let mut store = SqliteDestination::open_in_memory().unwrap();
        store
            .import_from_json(&package().to_json().unwrap(), Path::new("/assets"))
            .unwrap();
        store.backfill().unwrap();

        let hits = store.search("tomatoes", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_id, "n1");
        assert!(hits[0].snippet.contains("[tomatoes]"));
        assert!(store.search("   ", 10).unwrap().is_empty());
        assert!(store.search("\"quoted", 10).unwrap().is_empty());
    }

    #[test]
    fn backup_then_restore_recovers_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteDestination::open(dir.path().join("dest.sqlite3")).unwrap();
        store
            .import_from_json(&package().to_json().unwrap(), Path::new("/assets"))
            .unwrap();

        let backup_dir = store.backup(&dir.path().join("run")).unwrap();
        assert!(backup_dir.join(BACKUP_FILE_NAME).is_file());

        let mut replacement = ImportPackage::new(SourceKind::Markdown);
        replacement.notes.push(note("n9", "Other", "<p>other</p>"));
        store
            .import_from_json(&replacement.to_json().unwrap(), Path::new("/assets"))
            .unwrap();

        store.restore(&backup_dir).unwrap();
        let titles = {
            let mut stmt = store
                .connection()
                .prepare("SELECT title FROM notes ORDER BY id;")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
            rows.collect::<Result<Vec<_>, _>>().unwrap()
        };
        assert_eq!(titles, vec!["Garden plan".to_string(), "Reading".to_string()]);
        assert_eq!(store.search("novel", 5).unwrap().len(), 1);
    }

    #[test]
    fn restore_without_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteDestination::open_in_memory().unwrap();
        let error = store.restore(dir.path()).unwrap_err();
        assert!(matches!(error, DestinationError::BackupMissing(_)));
    }

    #[test]
    fn match_expression_quotes_every_term() {
        assert_eq!(
            build_match_expression("a \"b"),
            Some("\"a\" AND \"\"\"b\"".to_string())
        );
        assert_eq!(build_match_expression(" "), None);
    }
}
