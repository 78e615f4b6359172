//! Lifecycle maintenance — demotes memories through states by age and
//! salience.
//!
//! Two batch-bounded passes: `active → aging` for stale or low-salience
//! records, then `aging → archived` for records that stayed stale, which
//! also opens the undo window. Pinned records never age automatically.
//! Per-record failures are counted and skipped; the job never raises.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::LifecycleConfig;

/// Aggregate summary for one maintenance run.
#[derive(Debug, Default, Serialize)]
pub struct LifecycleRunResult {
    pub moved_to_aging: usize,
    pub archived: usize,
    pub failed: usize,
}

/// Run both demotion passes once.
///
/// The archival pass runs first so a record demoted to `aging` in this run
/// waits at least one full interval before it can be archived — each run
/// moves any record at most one state forward.
pub fn run_lifecycle(conn: &Connection, config: &LifecycleConfig) -> LifecycleRunResult {
    let mut result = LifecycleRunResult::default();
    let now = chrono::Utc::now();

    // Pass 1: aging → archived
    let archive_cutoff =
        (now - chrono::Duration::days(config.archive_after_days as i64)).to_rfc3339();
    match select_ids(
        conn,
        "SELECT id FROM memories \
         WHERE lifecycle_state = 'aging' AND pinned = 0 \
           AND COALESCE(last_accessed_at, created_at) < ?1 AND salience_score < ?2 \
         LIMIT ?3",
        params![archive_cutoff, config.archive_salience_ceiling, config.max_batch as i64],
    ) {
        Ok(ids) => {
            for id in ids {
                match archive_memory(conn, config, &id) {
                    Ok(true) => result.archived += 1,
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(%id, %error, "archival failed; skipped");
                        result.failed += 1;
                    }
                }
            }
        }
        Err(error) => tracing::warn!(%error, "archive candidate query failed"),
    }

    // Pass 2: active → aging
    let aging_cutoff = (now - chrono::Duration::days(config.aging_after_days as i64)).to_rfc3339();
    match select_ids(
        conn,
        "SELECT id FROM memories \
         WHERE lifecycle_state = 'active' AND pinned = 0 \
           AND (COALESCE(last_accessed_at, created_at) < ?1 OR salience_score < ?2) \
         LIMIT ?3",
        params![aging_cutoff, config.aging_salience_floor, config.max_batch as i64],
    ) {
        Ok(ids) => {
            for id in ids {
                let demoted = conn.execute(
                    "UPDATE memories SET lifecycle_state = 'aging', updated_at = ?1 \
                     WHERE id = ?2 AND lifecycle_state = 'active'",
                    params![now.to_rfc3339(), id],
                );
                match demoted {
                    Ok(n) => result.moved_to_aging += n,
                    Err(error) => {
                        tracing::warn!(%id, %error, "aging demotion failed; skipped");
                        result.failed += 1;
                    }
                }
            }
        }
        Err(error) => tracing::warn!(%error, "aging candidate query failed"),
    }

    tracing::info!(
        moved_to_aging = result.moved_to_aging,
        archived = result.archived,
        failed = result.failed,
        "lifecycle maintenance complete"
    );
    result
}

/// Archive one record: sets `archived_at = now` and opens the undo window.
///
/// Shared by the maintenance pass and the distillation engine so both use
/// identical archival semantics. Returns `false` if the record was already
/// archived (or gone).
pub(crate) fn archive_memory(
    conn: &Connection,
    config: &LifecycleConfig,
    id: &str,
) -> rusqlite::Result<bool> {
    let now = chrono::Utc::now();
    let undo_expiry = now + chrono::Duration::days(config.undo_window_days as i64);
    let changed = conn.execute(
        "UPDATE memories SET lifecycle_state = 'archived', archived_at = ?1, \
         undo_expiry_at = ?2, updated_at = ?1 \
         WHERE id = ?3 AND lifecycle_state NOT IN ('archived', 'distilled')",
        params![now.to_rfc3339(), undo_expiry.to_rfc3339(), id],
    )?;
    Ok(changed > 0)
}

fn select_ids(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt.query_map(params, |row| row.get(0))?.collect();
    ids
}
