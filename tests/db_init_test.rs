//! On-disk database initialization: directory creation, idempotent reopen,
//! stats over a real file.

mod helpers;

use engram::db;
use engram::memory::records::{create_memory, NewMemory};
use engram::memory::stats::memory_stats;

#[test]
fn open_creates_parent_directories_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("memory.db");

    let mut conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    create_memory(&mut conn, &NewMemory::fact("u1", "city", "Lisbon")).unwrap();
    drop(conn);

    // Reopen is idempotent and sees the existing data
    let conn = db::open_database(&db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);

    let stats = memory_stats(&conn, None, Some(&db_path)).unwrap();
    assert_eq!(stats.total_memories, 1);
    assert!(stats.db_size_bytes > 0);
}

#[test]
fn wal_mode_is_enabled_on_file_databases() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("memory.db");
    let conn = db::open_database(&db_path).unwrap();

    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}
