use recall_core::db::migrations::{apply_migrations, latest_version, schema_version};
use recall_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn fresh_store_reaches_latest_schema() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    for table in ["tasks", "review_events"] {
        assert!(has_object(&conn, "table", table), "missing table {table}");
    }
    assert!(has_object(&conn, "index", "idx_tasks_next_due"));
    assert!(has_object(&conn, "index", "idx_review_events_task_time"));
}

#[test]
fn reopening_a_current_store_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recall.db");
    drop(open_db(&path).unwrap());

    let mut conn = Connection::open(&path).unwrap();
    assert_eq!(apply_migrations(&mut conn).unwrap(), 0);
    assert_eq!(schema_version(&conn).unwrap(), latest_version());
}

#[test]
fn file_store_uses_wal_journal() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("recall.db")).unwrap();

    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_ascii_lowercase(), "wal");
}

#[test]
fn store_from_newer_build_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("PRAGMA user_version = 999;")
        .unwrap();

    match open_db(&path).unwrap_err() {
        DbError::SchemaTooNew { found, supported } => {
            assert_eq!(found, 999);
            assert_eq!(supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failed_upgrade_keeps_previous_version() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE tasks (id TEXT);").unwrap();

    match apply_migrations(&mut conn).unwrap_err() {
        DbError::Migration { version, .. } => assert_eq!(version, 1),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(schema_version(&conn).unwrap(), 0);
    assert!(!has_object(&conn, "table", "review_events"));
}

#[test]
fn review_events_cascade_with_their_task() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO tasks (id, name, created_at, current_interval_ms, next_due_at)
         VALUES ('t1', 'Ownership', 0, 10, 10);",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO review_events
            (task_id, sequence, reviewed_at, interval_before_ms, interval_after_ms)
         VALUES ('t1', 1, 10, 10, 10);",
        [],
    )
    .unwrap();

    conn.execute("DELETE FROM tasks WHERE id = 't1';", []).unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM review_events;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
}

fn has_object(conn: &Connection, kind: &str, name: &str) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2);",
        [kind, name],
        |row| row.get(0),
    )
    .unwrap()
}
