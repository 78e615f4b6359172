//! SQL DDL for the durable record store.
//!
//! Defines the `memories`, `memory_versions`, `recall_events`, `pii_audit`,
//! and `schema_meta` tables. Everything queried by a lifecycle or scoring
//! predicate is a flat column; open-ended blobs (`structured_value`,
//! `scores`, `pii_types`, `original_ids`) are JSON `TEXT`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Durable memory records
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    value TEXT NOT NULL,
    structured_value TEXT,
    type TEXT NOT NULL CHECK(type IN ('fact','preference','distilled')),
    source_type TEXT NOT NULL CHECK(source_type IN ('user','system','derived')),
    priority TEXT NOT NULL DEFAULT 'normal' CHECK(priority IN ('system','critical','normal','low')),
    salience_score REAL NOT NULL DEFAULT 1.0 CHECK(salience_score >= 0.8 AND salience_score <= 1.25),
    trust_confidence REAL CHECK(trust_confidence IS NULL OR (trust_confidence >= 0.0 AND trust_confidence <= 1.0)),
    trust_last_confirmed_at TEXT,
    trust_conflict_count INTEGER NOT NULL DEFAULT 0,
    lifecycle_state TEXT NOT NULL DEFAULT 'active'
        CHECK(lifecycle_state IN ('candidate','active','aging','archived','distilled')),
    archived_at TEXT,
    undo_expiry_at TEXT,
    pinned INTEGER NOT NULL DEFAULT 0,
    quiet INTEGER NOT NULL DEFAULT 0,
    ephemeral INTEGER NOT NULL DEFAULT 0,
    require_confirm INTEGER NOT NULL DEFAULT 0,
    sensitivity_level TEXT NOT NULL DEFAULT 'public'
        CHECK(sensitivity_level IN ('public','personal','restricted')),
    pii_types TEXT,
    decay_half_life_days REAL NOT NULL DEFAULT 30.0,
    last_accessed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    model_version TEXT,
    distilled_id TEXT,
    original_ids TEXT,
    conflict_with TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);
CREATE INDEX IF NOT EXISTS idx_memories_state ON memories(lifecycle_state);
CREATE INDEX IF NOT EXISTS idx_memories_salience ON memories(salience_score);
CREATE INDEX IF NOT EXISTS idx_memories_distilled ON memories(distilled_id);
CREATE INDEX IF NOT EXISTS idx_memories_user_title ON memories(user_id, title);

-- Immutable pre-mutation snapshots (insert-only)
CREATE TABLE IF NOT EXISTS memory_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL,
    value TEXT NOT NULL,
    structured_value TEXT,
    trust_confidence REAL,
    trust_last_confirmed_at TEXT,
    trust_conflict_count INTEGER NOT NULL DEFAULT 0,
    change_reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_versions_memory ON memory_versions(memory_id);

-- Retrieval audit trail (one row per query)
CREATE TABLE IF NOT EXISTS recall_events (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    query_text TEXT NOT NULL,
    scores TEXT NOT NULL,
    top_score REAL,
    avg_score REAL,
    injected_count INTEGER NOT NULL DEFAULT 0,
    gated_count INTEGER NOT NULL DEFAULT 0,
    near_miss_salience INTEGER NOT NULL DEFAULT 0,
    near_miss_trust INTEGER NOT NULL DEFAULT 0,
    near_miss_composite INTEGER NOT NULL DEFAULT 0,
    accepted INTEGER,
    responded_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_user ON recall_events(user_id);

-- Blocked sensitive-memory references (append-only)
CREATE TABLE IF NOT EXISTS pii_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    memory_id TEXT,
    trigger_text TEXT NOT NULL,
    rule TEXT NOT NULL,
    sensitivity_level TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in ["memories", "memory_versions", "recall_events", "pii_audit", "schema_meta"]
        {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn salience_bound_enforced_by_check() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO memories (id, user_id, title, value, type, source_type, salience_score, created_at, updated_at) \
             VALUES ('m1', 'u1', 't', 'v', 'fact', 'user', 2.0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
