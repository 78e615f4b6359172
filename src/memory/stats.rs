use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Operational snapshot of the memory store.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_memories: u64,
    pub by_lifecycle_state: HashMap<String, u64>,
    pub by_type: HashMap<String, u64>,
    pub pinned_memories: u64,
    pub version_snapshots: u64,
    pub recall_events: u64,
    pub pii_audit_entries: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<String>,
}

/// Compute memory store statistics.
///
/// If `user_id` is provided, memory counts are filtered to that user.
/// `db_path` is used for file size calculation; pass None for in-memory
/// databases.
pub fn memory_stats(
    conn: &Connection,
    user_id: Option<&str>,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let total = count_where(conn, "SELECT COUNT(*) FROM memories", user_id)?;
    let pinned = count_where(
        conn,
        "SELECT COUNT(*) FROM memories WHERE pinned = 1",
        user_id,
    )?;
    let by_lifecycle_state = count_grouped(conn, "lifecycle_state", user_id)?;
    let by_type = count_grouped(conn, "type", user_id)?;
    let (oldest, newest) = memory_time_range(conn, user_id)?;

    let version_snapshots: i64 =
        conn.query_row("SELECT COUNT(*) FROM memory_versions", [], |row| row.get(0))?;
    let recall_events: i64 =
        conn.query_row("SELECT COUNT(*) FROM recall_events", [], |row| row.get(0))?;
    let pii_audit_entries: i64 =
        conn.query_row("SELECT COUNT(*) FROM pii_audit", [], |row| row.get(0))?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_memories: total,
        by_lifecycle_state,
        by_type,
        pinned_memories: pinned,
        version_snapshots: version_snapshots as u64,
        recall_events: recall_events as u64,
        pii_audit_entries: pii_audit_entries as u64,
        db_size_bytes,
        oldest_memory: oldest,
        newest_memory: newest,
    })
}

fn count_where(conn: &Connection, base_sql: &str, user_id: Option<&str>) -> Result<u64> {
    let joiner = if base_sql.contains("WHERE") { "AND" } else { "WHERE" };
    let count: i64 = if let Some(user_id) = user_id {
        conn.query_row(
            &format!("{base_sql} {joiner} user_id = ?1"),
            params![user_id],
            |row| row.get(0),
        )?
    } else {
        conn.query_row(base_sql, [], |row| row.get(0))?
    };
    Ok(count as u64)
}

/// Count grouped by one column, zero-filled for the known values.
fn count_grouped(
    conn: &Connection,
    column: &str,
    user_id: Option<&str>,
) -> Result<HashMap<String, u64>> {
    let mut map = HashMap::new();
    let known: &[&str] = match column {
        "lifecycle_state" => &["candidate", "active", "aging", "archived", "distilled"],
        _ => &["fact", "preference", "distilled"],
    };
    for value in known {
        map.insert(value.to_string(), 0);
    }

    let rows: Vec<(String, i64)> = if let Some(user_id) = user_id {
        let sql =
            format!("SELECT {column}, COUNT(*) FROM memories WHERE user_id = ?1 GROUP BY {column}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    } else {
        let sql = format!("SELECT {column}, COUNT(*) FROM memories GROUP BY {column}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    for (value, count) in rows {
        map.insert(value, count as u64);
    }
    Ok(map)
}

fn memory_time_range(
    conn: &Connection,
    user_id: Option<&str>,
) -> Result<(Option<String>, Option<String>)> {
    let range = if let Some(user_id) = user_id {
        conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM memories WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
    } else {
        conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM memories",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
    };
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::records::{create_memory, NewMemory};

    #[test]
    fn stats_count_states_and_types() {
        let mut conn = db::open_memory_database().unwrap();
        create_memory(&mut conn, &NewMemory::fact("u1", "a", "v")).unwrap();
        let b = create_memory(&mut conn, &NewMemory::fact("u1", "b", "v")).unwrap();
        conn.execute(
            "UPDATE memories SET lifecycle_state = 'archived' WHERE id = ?1",
            params![b.id],
        )
        .unwrap();
        create_memory(&mut conn, &NewMemory::fact("u2", "c", "v")).unwrap();

        let stats = memory_stats(&conn, None, None).unwrap();
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.by_lifecycle_state["active"], 2);
        assert_eq!(stats.by_lifecycle_state["archived"], 1);
        assert_eq!(stats.by_lifecycle_state["aging"], 0);
        assert_eq!(stats.by_type["fact"], 3);

        let just_u1 = memory_stats(&conn, Some("u1"), None).unwrap();
        assert_eq!(just_u1.total_memories, 2);
    }

    #[test]
    fn stats_on_empty_store() {
        let conn = db::open_memory_database().unwrap();
        let stats = memory_stats(&conn, None, None).unwrap();
        assert_eq!(stats.total_memories, 0);
        assert_eq!(stats.oldest_memory, None);
        assert_eq!(stats.db_size_bytes, 0);
    }
}
