mod common;

use common::{FakeFetcher, LegacyFixture, PNG_BYTES};
use lazynote_import::db::migrations::latest_version;
use lazynote_import::{
    run_import, DestinationError, DestinationStore, ImportOptions, ImportOutcome, ImportServices,
    JsonSnapshotDecoder, SourceKind, SqliteDestination,
};
use std::path::Path;
use std::sync::Arc;

fn fixture(body: &str) -> LegacyFixture {
    let fixture = LegacyFixture::new();
    fixture
        .notebook("nb1", "Inbox", Some("Stack:Work"))
        .tag("t1", "urgent", None)
        .note("n1", "Plan", Some("nb1"), false)
        .note("n2", "Ghost", Some("nb1"), true)
        .note_tag("n1", "t1")
        .attachment("a1", "n1", "ab12cd34", "chart.png", "image/png", true)
        .resource("n1", "ab12cd34", PNG_BYTES)
        .update_log("n1", "Plan", body);
    fixture
}

fn import_into(
    destination: &mut SqliteDestination,
    root: &Path,
    assets: &Path,
    backups: &Path,
) -> ImportOutcome {
    let options = ImportOptions::new(root, SourceKind::Legacy, assets, backups);
    run_import(
        &options,
        ImportServices {
            destination,
            decoder: Some(Arc::new(JsonSnapshotDecoder)),
            fetcher: &FakeFetcher::default(),
            progress: None,
        },
    )
    .unwrap()
}

fn count(destination: &SqliteDestination, table: &str) -> i64 {
    destination
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn legacy_import_lands_in_a_migrated_store_and_is_searchable() {
    let work = tempfile::tempdir().unwrap();
    let source = fixture("<en-note><div>Quarterly roadmap review</div></en-note>");
    let mut destination = SqliteDestination::open(work.path().join("lazynote.sqlite3")).unwrap();

    let version: u32 = destination
        .connection()
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());
    assert!(!destination.has_existing_data().unwrap());

    let outcome = import_into(
        &mut destination,
        source.root(),
        &work.path().join("assets"),
        &work.path().join("backups"),
    );

    assert!(!outcome.failed());
    let written = outcome.report.stats.written.unwrap();
    assert_eq!(written.notes, 1);
    assert_eq!(written.note_tags, 1);
    assert_eq!(written.stacks, 1);
    assert_eq!(count(&destination, "notes"), 1);
    assert_eq!(count(&destination, "attachments"), 1);

    let local_path: String = destination
        .connection()
        .query_row(
            "SELECT local_path FROM attachments WHERE data_hash = 'ab12cd34';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!(Path::new(&local_path).is_file());

    let hits = destination.search("roadmap", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].note_id, "n1");
    assert_eq!(hits[0].title, "Plan");
    assert!(hits[0].snippet.contains("[roadmap]"));
    assert!(destination.search("ghost", 10).unwrap().is_empty());
}

#[test]
fn second_import_backs_up_and_restore_recovers_first_content() {
    let work = tempfile::tempdir().unwrap();
    let assets = work.path().join("assets");
    let backups = work.path().join("backups");
    let mut destination = SqliteDestination::open(work.path().join("lazynote.sqlite3")).unwrap();

    let first = fixture("<en-note><div>original wording</div></en-note>");
    let first_outcome = import_into(&mut destination, first.root(), &assets, &backups);
    assert!(!first_outcome.failed());
    assert!(!first_outcome
        .backup_dir()
        .join(lazynote_import::destination::BACKUP_FILE_NAME)
        .exists());

    let second = fixture("<en-note><div>rewritten wording</div></en-note>");
    let second_outcome = import_into(&mut destination, second.root(), &assets, &backups);
    assert!(!second_outcome.failed());
    assert!(second_outcome
        .backup_dir()
        .join(lazynote_import::destination::BACKUP_FILE_NAME)
        .is_file());
    assert_eq!(destination.search("rewritten", 5).unwrap().len(), 1);
    assert!(destination.search("original", 5).unwrap().is_empty());

    destination.restore(second_outcome.backup_dir()).unwrap();

    assert_eq!(destination.search("original", 5).unwrap().len(), 1);
    assert!(destination.search("rewritten", 5).unwrap().is_empty());
    assert_eq!(count(&destination, "note_tags"), 1);
}

#[test]
fn restore_from_a_run_without_backup_is_an_error() {
    let work = tempfile::tempdir().unwrap();
    let mut destination = SqliteDestination::open_in_memory().unwrap();

    let err = destination.restore(work.path()).unwrap_err();

    assert!(matches!(err, DestinationError::BackupMissing(_)));
}
