#![allow(dead_code)]

use lazynote_import::import::package::ImportPackage;
use lazynote_import::{
    DecodeError, DestinationError, DestinationResult, DestinationStore, DocumentRegions,
    FetchError, ImportCounts, JsonSnapshotDecoder, ProgressEvent, RemoteAsset, RemoteFetcher,
    UpdateLogDecoder,
};
use rusqlite::{params, Connection};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Legacy application directory with a real SQLite store.
pub struct LegacyFixture {
    pub dir: TempDir,
    conn: Connection,
}

impl LegacyFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("documents")).unwrap();
        fs::create_dir_all(dir.path().join("resource-cache")).unwrap();
        let conn = Connection::open(dir.path().join("LocalStore.sql")).unwrap();
        conn.execute_batch(
            "CREATE TABLE notebooks (id TEXT, label TEXT, stack_id TEXT, created REAL, updated REAL);
             CREATE TABLE tags (id TEXT, label TEXT, parent_id TEXT);
             CREATE TABLE notes (id TEXT, label TEXT, notebook_id TEXT, created REAL, updated REAL, deleted REAL);
             CREATE TABLE note_tags (note_id TEXT, tag_id TEXT);
             CREATE TABLE attachments (
                 id TEXT, parent_note_id TEXT, data_hash TEXT, filename TEXT,
                 mime TEXT, data_size INTEGER, is_active INTEGER
             );",
        )
        .unwrap();
        Self { dir, conn }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn notebook(&self, id: &str, label: &str, stack: Option<&str>) -> &Self {
        self.conn
            .execute(
                "INSERT INTO notebooks VALUES (?1, ?2, ?3, 1700000000000, 1700000500000);",
                params![id, label, stack],
            )
            .unwrap();
        self
    }

    pub fn tag(&self, id: &str, label: &str, parent: Option<&str>) -> &Self {
        self.conn
            .execute(
                "INSERT INTO tags VALUES (?1, ?2, ?3);",
                params![id, label, parent],
            )
            .unwrap();
        self
    }

    pub fn note(&self, id: &str, label: &str, notebook: Option<&str>, deleted: bool) -> &Self {
        let deleted = if deleted { Some(1_700_000_900_000.0) } else { None };
        self.conn
            .execute(
                "INSERT INTO notes VALUES (?1, ?2, ?3, 1700000000000, 1700000100, ?4);",
                params![id, label, notebook, deleted],
            )
            .unwrap();
        self
    }

    pub fn note_tag(&self, note_id: &str, tag_id: &str) -> &Self {
        self.conn
            .execute(
                "INSERT INTO note_tags VALUES (?1, ?2);",
                params![note_id, tag_id],
            )
            .unwrap();
        self
    }

    pub fn attachment(
        &self,
        id: &str,
        note_id: &str,
        hash: &str,
        filename: &str,
        mime: &str,
        active: bool,
    ) -> &Self {
        self.conn
            .execute(
                "INSERT INTO attachments VALUES (?1, ?2, ?3, ?4, ?5, 4, ?6);",
                params![id, note_id, hash, filename, mime, i64::from(active)],
            )
            .unwrap();
        self
    }

    /// Writes a JSON region snapshot as the note's update log.
    pub fn update_log(&self, note_id: &str, title: &str, content: &str) -> &Self {
        let body = serde_json::json!({ "title": title, "content": content });
        self.raw_update_log(note_id, body.to_string().as_bytes())
    }

    pub fn raw_update_log(&self, note_id: &str, bytes: &[u8]) -> &Self {
        fs::write(
            self.root().join("documents").join(format!("{note_id}.dat")),
            bytes,
        )
        .unwrap();
        self
    }

    pub fn resource(&self, note_id: &str, hash: &str, bytes: &[u8]) -> &Self {
        let dir = self.root().join("resource-cache").join(note_id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(hash), bytes).unwrap();
        self
    }
}

/// Destination double that records calls and keeps the last package.
#[derive(Default)]
pub struct RecordingDestination {
    pub existing_data: bool,
    pub fail_backup: bool,
    pub fail_import: bool,
    pub fail_backfill: bool,
    pub calls: RefCell<Vec<String>>,
    pub packages: Vec<ImportPackage>,
}

impl RecordingDestination {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }

    pub fn last_package(&self) -> &ImportPackage {
        self.packages.last().expect("a package was imported")
    }
}

impl DestinationStore for RecordingDestination {
    fn has_existing_data(&self) -> DestinationResult<bool> {
        Ok(self.existing_data)
    }

    fn backup(&self, dir: &Path) -> DestinationResult<PathBuf> {
        self.record("backup");
        if self.fail_backup {
            return Err(DestinationError::Io {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"),
            });
        }
        fs::write(dir.join("backup.marker"), b"ok").unwrap();
        Ok(dir.to_path_buf())
    }

    fn import_from_json(
        &mut self,
        package_json: &str,
        _assets_dir: &Path,
    ) -> DestinationResult<ImportCounts> {
        self.record("import");
        if self.fail_import {
            return Err(DestinationError::BackupMissing(PathBuf::from("n/a")));
        }
        let package = ImportPackage::from_json(package_json)?;
        let counts = ImportCounts {
            stacks: package.stacks.len() as u64,
            notebooks: package.notebooks.len() as u64,
            tags: package.tags.len() as u64,
            notes: package.notes.len() as u64,
            note_tags: 0,
            attachments: package.attachments.len() as u64,
        };
        self.packages.push(package);
        Ok(counts)
    }

    fn backfill(&mut self) -> DestinationResult<()> {
        self.record("backfill");
        if self.fail_backfill {
            return Err(DestinationError::BackupMissing(PathBuf::from("fts")));
        }
        Ok(())
    }

    fn restore(&mut self, _backup_dir: &Path) -> DestinationResult<()> {
        self.record("restore");
        Ok(())
    }
}

/// Serves canned bytes per URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    pub responses: HashMap<String, (Vec<u8>, Option<String>)>,
}

impl FakeFetcher {
    pub fn with(mut self, url: &str, bytes: &[u8], content_type: Option<&str>) -> Self {
        self.responses.insert(
            url.to_string(),
            (bytes.to_vec(), content_type.map(str::to_string)),
        );
        self
    }
}

impl RemoteFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<RemoteAsset, FetchError> {
        match self.responses.get(url) {
            Some((bytes, content_type)) => Ok(RemoteAsset {
                bytes: bytes.clone(),
                content_type: content_type.clone(),
            }),
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Snapshot decoder that stalls before answering.
pub struct SlowDecoder(pub Duration);

impl UpdateLogDecoder for SlowDecoder {
    fn decode(&self, update_log: &[u8]) -> Result<DocumentRegions, DecodeError> {
        thread::sleep(self.0);
        JsonSnapshotDecoder.decode(update_log)
    }
}

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub fn drain(rx: Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    rx.iter().collect()
}

pub fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

pub fn dir_entries(path: &Path) -> Vec<String> {
    match fs::read_dir(path) {
        Ok(entries) => entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
