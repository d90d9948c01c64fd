use lazynote_import::db::migrations::latest_version;
use lazynote_import::db::{
    list_tables, open_destination_db, open_destination_db_in_memory, open_source_db, table_exists,
    DbError,
};
use rusqlite::Connection;

#[test]
fn destination_in_memory_applies_all_migrations() {
    let conn = open_destination_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in ["stacks", "notebooks", "tags", "notes", "note_tags", "attachments", "notes_fts"] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_destination_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lazynote.sqlite3");

    let conn_first = open_destination_db(&path).unwrap();
    conn_first
        .execute("INSERT INTO stacks (id, name) VALUES ('s1', 'Work');", [])
        .unwrap();
    drop(conn_first);

    let conn_second = open_destination_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let stacks: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM stacks;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stacks, 1);
}

#[test]
fn destination_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_destination_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn source_store_is_opened_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LocalStore.sql");
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE notes (id TEXT);")
        .unwrap();

    let conn = open_source_db(&path).unwrap();

    assert_eq!(list_tables(&conn).unwrap(), vec!["notes".to_string()]);
    assert!(conn.execute("INSERT INTO notes VALUES ('n1');", []).is_err());
    assert_eq!(schema_version(&conn), 0);
}

#[test]
fn non_database_source_fails_on_first_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LocalStore.sql");
    std::fs::write(&path, b"definitely not a database file").unwrap();

    let conn = open_source_db(&path).unwrap();

    assert!(list_tables(&conn).is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    assert!(
        table_exists(conn, table_name).unwrap(),
        "table {table_name} does not exist"
    );
}
