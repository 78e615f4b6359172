#![allow(dead_code)]

use engram::db;
use engram::memory::records::{create_memory, NewMemory};
use engram::memory::types::MemoryRecord;
use rusqlite::{params, Connection};

/// Open a fresh in-memory database with the schema applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Insert a plain user fact. Returns the full record.
pub fn seed_memory(conn: &mut Connection, user_id: &str, title: &str, value: &str) -> MemoryRecord {
    create_memory(conn, &NewMemory::fact(user_id, title, value)).unwrap()
}

/// Rewind a record's creation and last access to `days_ago` days in the past.
pub fn backdate(conn: &Connection, id: &str, days_ago: i64) {
    let old = (chrono::Utc::now() - chrono::Duration::days(days_ago)).to_rfc3339();
    conn.execute(
        "UPDATE memories SET created_at = ?1, last_accessed_at = ?1 WHERE id = ?2",
        params![old, id],
    )
    .unwrap();
}

pub fn set_salience(conn: &Connection, id: &str, salience: f64) {
    conn.execute(
        "UPDATE memories SET salience_score = ?1 WHERE id = ?2",
        params![salience, id],
    )
    .unwrap();
}

pub fn lifecycle_state(conn: &Connection, id: &str) -> String {
    conn.query_row(
        "SELECT lifecycle_state FROM memories WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .unwrap()
}
