//! Version snapshots and archived-record restore.
//!
//! Guarantees no silent loss of prior memory content: every mutating update
//! inserts an immutable copy of `{value, structured_value, trust}` first.
//! Restore flips an `archived` record back to `active`, but only inside its
//! undo window — outside it the call is a reported no-op, not an error.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::errors::MemoryResult;
use crate::memory::records::get_memory;
use crate::memory::types::{LifecycleState, MemoryRecord, StructuredValue, Trust, VersionSnapshot};

/// Result of a restore attempt. `reason` is machine-readable:
/// `"restored"`, `"not_archived"`, or `"undo_window_expired"`.
#[derive(Debug, Serialize)]
pub struct RestoreOutcome {
    pub id: String,
    pub restored: bool,
    pub reason: &'static str,
}

/// Insert an immutable snapshot of the record's mutable content.
///
/// Called before every overwrite of `value`, `structured_value`, or trust
/// fields. Accepts a `Transaction` via deref so the snapshot commits or
/// rolls back together with the mutation it protects.
pub(crate) fn snapshot_before_write(
    conn: &Connection,
    record: &MemoryRecord,
    change_reason: &str,
) -> MemoryResult<()> {
    let structured_json = record
        .structured_value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO memory_versions (memory_id, value, structured_value, trust_confidence, \
         trust_last_confirmed_at, trust_conflict_count, change_reason, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.value,
            structured_json,
            record.trust.confidence,
            record.trust.last_confirmed_at,
            record.trust.conflict_count,
            change_reason,
            now,
        ],
    )?;
    Ok(())
}

/// Restore an archived record to `active`.
///
/// Only `archived` records qualify, and only while `now < undo_expiry_at`.
/// Both refusals are hard policy boundaries reported via [`RestoreOutcome`];
/// the record is left untouched.
pub fn restore_memory(
    conn: &mut Connection,
    user_id: &str,
    id: &str,
) -> MemoryResult<RestoreOutcome> {
    let record = get_memory(conn, user_id, id)?;

    if record.lifecycle_state != LifecycleState::Archived {
        return Ok(RestoreOutcome {
            id: record.id,
            restored: false,
            reason: "not_archived",
        });
    }

    let now = chrono::Utc::now();
    let inside_window = record
        .undo_expiry_at
        .as_deref()
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|expiry| now < expiry)
        .unwrap_or(false);
    if !inside_window {
        return Ok(RestoreOutcome {
            id: record.id,
            restored: false,
            reason: "undo_window_expired",
        });
    }

    let tx = conn.transaction()?;
    snapshot_before_write(&tx, &record, "restore")?;
    tx.execute(
        "UPDATE memories SET lifecycle_state = 'active', archived_at = NULL, \
         undo_expiry_at = NULL, updated_at = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), id],
    )?;
    tx.commit()?;

    Ok(RestoreOutcome {
        id: record.id,
        restored: true,
        reason: "restored",
    })
}

/// All snapshots for one record, newest first.
pub fn list_versions(conn: &Connection, user_id: &str, id: &str) -> MemoryResult<Vec<VersionSnapshot>> {
    // Owner check first so a foreign id reads as not-found, not an empty list
    get_memory(conn, user_id, id)?;

    let mut stmt = conn.prepare(
        "SELECT id, memory_id, value, structured_value, trust_confidence, \
         trust_last_confirmed_at, trust_conflict_count, change_reason, created_at \
         FROM memory_versions WHERE memory_id = ?1 ORDER BY id DESC",
    )?;
    let snapshots = stmt
        .query_map(params![id], |row| {
            let structured_raw: Option<String> = row.get(3)?;
            let structured_value: Option<StructuredValue> = structured_raw
                .map(|s| {
                    serde_json::from_str(&s).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })
                })
                .transpose()?;
            Ok(VersionSnapshot {
                id: row.get(0)?,
                memory_id: row.get(1)?,
                value: row.get(2)?,
                structured_value,
                trust: Trust {
                    confidence: row.get(4)?,
                    last_confirmed_at: row.get(5)?,
                    conflict_count: row.get(6)?,
                },
                change_reason: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(snapshots)
}
