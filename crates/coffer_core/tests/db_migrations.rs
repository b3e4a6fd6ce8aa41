use coffer_core::db::migrations::latest_version;
use coffer_core::db::{Database, DbError};
use rusqlite::Connection;

#[test]
fn in_memory_database_applies_all_migrations() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.freshly_created());

    inspect(&db, |conn| {
        assert_eq!(schema_version(conn), latest_version());
        assert_table_exists(conn, "stores");
        assert_table_exists(conn, "records");
        assert_index_exists(conn, "idx_records_expires_at");
    });
}

#[test]
fn reopening_a_database_keeps_schema_and_is_not_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coffer.db");

    let first = Database::open(&path).unwrap();
    assert!(first.freshly_created());
    drop(first);

    let second = Database::open(&path).unwrap();
    assert!(!second.freshly_created());
    inspect(&second, |conn| {
        assert_eq!(schema_version(conn), latest_version());
        assert_table_exists(conn, "records");
    });
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = Database::open(&path).unwrap_err();
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
fn schema_rejects_expiry_before_creation() {
    let db = Database::open_in_memory().unwrap();
    inspect(&db, |conn| {
        conn.execute(
            "INSERT INTO stores (title, created_at, updated_at) VALUES ('s', 10, 10);",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO records (store_id, id, title, buffer, created_at, updated_at, expires_at)
             VALUES (1, 1, 'r', x'00', 100, 100, 50);",
            [],
        );
        assert!(result.is_err());
    });
}

fn inspect<T>(db: &Database, check: impl FnOnce(&Connection) -> T) -> T {
    db.with_conn(|conn| Ok::<_, DbError>(check(conn))).unwrap()
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    assert_schema_object(conn, "table", table_name);
}

fn assert_index_exists(conn: &Connection, index_name: &str) {
    assert_schema_object(conn, "index", index_name);
}

fn assert_schema_object(conn: &Connection, kind: &str, name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "{kind} {name} does not exist");
}
