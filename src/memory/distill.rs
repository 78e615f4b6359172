//! Distillation — compacts groups of low-value memories into one summary
//! record with lineage back-references.
//!
//! The scan picks unpinned aging/archived records below the salience cutoff
//! and older than the age floor, groups them per user, and hands each group
//! to [`distill_group`]. Idempotency lives there: a group whose members all
//! already point at the same summary is reported, not re-distilled. The
//! originals are archived through the same mechanism the lifecycle
//! maintainer uses.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{DistillConfig, LifecycleConfig};
use crate::errors::{MemoryError, MemoryResult};
use crate::memory::lifecycle::archive_memory;
use crate::memory::records::fetch_record;
use crate::memory::types::{LifecycleState, MemoryRecord};
use crate::store::Summarizer;

/// Result of distilling one candidate group. `reason` is machine-readable:
/// `"distilled"`, `"already_distilled"`, or `"not_enough_candidates"`.
#[derive(Debug, Serialize)]
pub struct DistillOutcome {
    pub created: bool,
    pub reason: &'static str,
    pub distilled_id: Option<String>,
    pub original_ids: Vec<String>,
}

/// Aggregate summary for one distillation scan.
#[derive(Debug, Default, Serialize)]
pub struct DistillRunResult {
    pub users_processed: usize,
    pub groups_created: usize,
    pub groups_skipped: usize,
    pub failed: usize,
}

/// Scan for distillable backlogs and compact them, bounded by the run caps.
///
/// Either cap at zero or below disables the scan entirely.
pub async fn run_distillation(
    conn: &mut Connection,
    lifecycle: &LifecycleConfig,
    config: &DistillConfig,
    summarizer: Option<&dyn Summarizer>,
) -> DistillRunResult {
    let mut result = DistillRunResult::default();
    if config.global_cap <= 0 || config.per_user_cap <= 0 {
        tracing::info!("distillation disabled by cap; scan skipped");
        return result;
    }

    let cutoff =
        (chrono::Utc::now() - chrono::Duration::days(config.min_age_days as i64)).to_rfc3339();
    let candidates: Vec<(String, String)> = match scan_candidates(conn, config, &cutoff) {
        Ok(rows) => rows,
        Err(error) => {
            tracing::warn!(%error, "distillation candidate scan failed");
            return result;
        }
    };

    let mut per_user: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (user_id, id) in candidates {
        per_user.entry(user_id).or_default().push(id);
    }

    let mut groups_run: i64 = 0;
    'users: for (user_id, ids) in per_user {
        let mut user_groups: i64 = 0;
        result.users_processed += 1;
        for group in ids.chunks(config.group_size.max(2)) {
            if groups_run >= config.global_cap {
                break 'users;
            }
            if user_groups >= config.per_user_cap {
                break;
            }
            if group.len() < 2 {
                continue;
            }
            groups_run += 1;
            user_groups += 1;
            match distill_group(conn, lifecycle, config, summarizer, &user_id, group).await {
                Ok(outcome) if outcome.created => result.groups_created += 1,
                Ok(outcome) => {
                    tracing::debug!(%user_id, reason = outcome.reason, "group not distilled");
                    result.groups_skipped += 1;
                }
                Err(error) => {
                    tracing::warn!(%user_id, %error, "distillation failed for group; skipped");
                    result.failed += 1;
                }
            }
        }
    }

    tracing::info!(
        users_processed = result.users_processed,
        groups_created = result.groups_created,
        groups_skipped = result.groups_skipped,
        failed = result.failed,
        "distillation scan complete"
    );
    result
}

/// Distill one candidate group into a summary record.
///
/// If every candidate already shares the same `distilled_id`, the prior
/// summary id is returned with no write. Otherwise: summarize, insert the
/// summary as an `active` derived record carrying `original_ids`, then point
/// each original at it and archive the ones not already archived.
pub async fn distill_group(
    conn: &mut Connection,
    lifecycle: &LifecycleConfig,
    config: &DistillConfig,
    summarizer: Option<&dyn Summarizer>,
    user_id: &str,
    candidate_ids: &[String],
) -> MemoryResult<DistillOutcome> {
    if candidate_ids.is_empty() {
        return Ok(DistillOutcome {
            created: false,
            reason: "not_enough_candidates",
            distilled_id: None,
            original_ids: Vec::new(),
        });
    }

    let mut records = Vec::with_capacity(candidate_ids.len());
    for id in candidate_ids {
        let record = fetch_record(conn, id)?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| MemoryError::NotFound(format!("memory not found: {id}")))?;
        records.push(record);
    }

    // Idempotency: a group that was already distilled as a whole reports the
    // existing summary instead of creating another one.
    let shared = records[0].distilled_id.clone();
    if shared.is_some() && records.iter().all(|r| r.distilled_id == shared) {
        return Ok(DistillOutcome {
            created: false,
            reason: "already_distilled",
            distilled_id: shared,
            original_ids: candidate_ids.to_vec(),
        });
    }

    // Records distilled in an earlier partial group are off-limits.
    let eligible: Vec<&MemoryRecord> =
        records.iter().filter(|r| r.distilled_id.is_none()).collect();
    if eligible.len() < 2 {
        return Ok(DistillOutcome {
            created: false,
            reason: "not_enough_candidates",
            distilled_id: None,
            original_ids: candidate_ids.to_vec(),
        });
    }

    let summary = summarize_group(summarizer, &eligible, config.summary_char_limit).await;
    let title = format!("Distilled summary of {} memories", eligible.len());
    let original_ids: Vec<String> = eligible.iter().map(|r| r.id.clone()).collect();
    let distilled_id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO memories (id, user_id, title, value, type, source_type, priority, \
         salience_score, trust_conflict_count, lifecycle_state, pinned, quiet, ephemeral, \
         require_confirm, sensitivity_level, pii_types, decay_half_life_days, created_at, \
         updated_at, original_ids) \
         VALUES (?1, ?2, ?3, ?4, 'distilled', 'derived', 'normal', 1.0, 0, 'active', 0, 0, 0, 0, \
         'public', '[]', 30.0, ?5, ?5, ?6)",
        params![
            distilled_id,
            user_id,
            title,
            summary,
            now,
            serde_json::to_string(&original_ids)?,
        ],
    )?;

    for record in &eligible {
        tx.execute(
            "UPDATE memories SET distilled_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![distilled_id, now, record.id],
        )?;
        if record.lifecycle_state != LifecycleState::Archived {
            archive_memory(&tx, lifecycle, &record.id)?;
        }
    }
    tx.commit()?;

    tracing::info!(%user_id, %distilled_id, originals = original_ids.len(), "group distilled");
    Ok(DistillOutcome {
        created: true,
        reason: "distilled",
        distilled_id: Some(distilled_id),
        original_ids,
    })
}

/// Summarize via the collaborator when present, falling back to a
/// deterministic title join capped at the char limit.
async fn summarize_group(
    summarizer: Option<&dyn Summarizer>,
    records: &[&MemoryRecord],
    char_limit: usize,
) -> String {
    if let Some(summarizer) = summarizer {
        let items: Vec<String> = records
            .iter()
            .map(|r| format!("{}: {}", r.title, r.value))
            .collect();
        match summarizer.summarize(&items, char_limit).await {
            Ok(summary) if !summary.trim().is_empty() => {
                let mut summary = summary;
                summary.truncate(char_limit);
                return summary;
            }
            Ok(_) => tracing::warn!("summarizer returned empty text; using fallback"),
            Err(error) => tracing::warn!(%error, "summarizer failed; using fallback"),
        }
    }

    let mut joined = records
        .iter()
        .map(|r| r.title.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    joined.truncate(char_limit);
    joined
}

fn scan_candidates(
    conn: &Connection,
    config: &DistillConfig,
    cutoff: &str,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, id FROM memories \
         WHERE lifecycle_state IN ('aging', 'archived') AND pinned = 0 \
           AND type != 'distilled' AND distilled_id IS NULL \
           AND salience_score <= ?1 AND COALESCE(last_accessed_at, created_at) < ?2 \
         ORDER BY user_id, created_at",
        )?;
    let rows = stmt
        .query_map(params![config.max_salience, cutoff], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect();
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::records::{create_memory, get_memory, NewMemory};
    use anyhow::Result;
    use async_trait::async_trait;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    /// Seeds an unpinned aging record old and dull enough to distill.
    fn seed_candidate(conn: &mut Connection, user_id: &str, title: &str) -> String {
        let record = create_memory(conn, &NewMemory::fact(user_id, title, "some detail")).unwrap();
        let old = (chrono::Utc::now() - chrono::Duration::days(90)).to_rfc3339();
        conn.execute(
            "UPDATE memories SET lifecycle_state = 'aging', salience_score = 0.85, \
             created_at = ?1, last_accessed_at = ?1 WHERE id = ?2",
            params![old, record.id],
        )
        .unwrap();
        record.id
    }

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _items: &[String], _char_limit: usize) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _items: &[String], _char_limit: usize) -> Result<String> {
            anyhow::bail!("summarizer offline")
        }
    }

    #[tokio::test]
    async fn distill_creates_summary_and_rewires_lineage() {
        let mut conn = test_db();
        let ids = vec![
            seed_candidate(&mut conn, "u1", "old note a"),
            seed_candidate(&mut conn, "u1", "old note b"),
        ];

        let outcome = distill_group(
            &mut conn,
            &LifecycleConfig::default(),
            &DistillConfig::default(),
            Some(&FixedSummarizer("both notes, condensed")),
            "u1",
            &ids,
        )
        .await
        .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.reason, "distilled");
        let distilled_id = outcome.distilled_id.unwrap();

        let summary = get_memory(&conn, "u1", &distilled_id).unwrap();
        assert_eq!(summary.value, "both notes, condensed");
        assert_eq!(summary.lifecycle_state, LifecycleState::Active);
        assert_eq!(summary.original_ids.as_ref().unwrap(), &ids);
        assert_eq!(summary.memory_type.as_str(), "distilled");
        assert_eq!(summary.source_type.as_str(), "derived");

        for id in &ids {
            let original = get_memory(&conn, "u1", id).unwrap();
            assert_eq!(original.distilled_id.as_deref(), Some(distilled_id.as_str()));
            assert_eq!(original.lifecycle_state, LifecycleState::Archived);
            assert!(original.undo_expiry_at.is_some());
        }
    }

    #[tokio::test]
    async fn distilling_the_same_group_twice_is_idempotent() {
        let mut conn = test_db();
        let ids = vec![
            seed_candidate(&mut conn, "u1", "a"),
            seed_candidate(&mut conn, "u1", "b"),
        ];
        let lifecycle = LifecycleConfig::default();
        let config = DistillConfig::default();

        let first = distill_group(&mut conn, &lifecycle, &config, None, "u1", &ids)
            .await
            .unwrap();
        let second = distill_group(&mut conn, &lifecycle, &config, None, "u1", &ids)
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.reason, "already_distilled");
        assert_eq!(second.distilled_id, first.distilled_id);

        // Still exactly one summary record
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE type = 'distilled'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn fallback_summary_is_a_capped_title_join() {
        let mut conn = test_db();
        let ids = vec![
            seed_candidate(&mut conn, "u1", "first title"),
            seed_candidate(&mut conn, "u1", "second title"),
        ];

        let outcome = distill_group(
            &mut conn,
            &LifecycleConfig::default(),
            &DistillConfig {
                summary_char_limit: 15,
                ..DistillConfig::default()
            },
            Some(&FailingSummarizer),
            "u1",
            &ids,
        )
        .await
        .unwrap();

        let summary = get_memory(&conn, "u1", &outcome.distilled_id.unwrap()).unwrap();
        assert_eq!(summary.value, "first title; se");
    }

    #[tokio::test]
    async fn scan_picks_up_eligible_backlogs() {
        let mut conn = test_db();
        for i in 0..3 {
            seed_candidate(&mut conn, "u1", &format!("note {i}"));
        }
        // Fresh active record must not be swept in
        create_memory(&mut conn, &NewMemory::fact("u1", "fresh", "v")).unwrap();

        let result = run_distillation(
            &mut conn,
            &LifecycleConfig::default(),
            &DistillConfig::default(),
            None,
        )
        .await;

        assert_eq!(result.users_processed, 1);
        assert_eq!(result.groups_created, 1);

        let summary_originals: String = conn
            .query_row(
                "SELECT original_ids FROM memories WHERE type = 'distilled'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let originals: Vec<String> = serde_json::from_str(&summary_originals).unwrap();
        assert_eq!(originals.len(), 3);
    }

    #[tokio::test]
    async fn zero_cap_skips_the_scan() {
        let mut conn = test_db();
        seed_candidate(&mut conn, "u1", "a");
        seed_candidate(&mut conn, "u1", "b");

        let config = DistillConfig {
            global_cap: 0,
            ..DistillConfig::default()
        };
        let result =
            run_distillation(&mut conn, &LifecycleConfig::default(), &config, None).await;
        assert_eq!(result.users_processed, 0);
        assert_eq!(result.groups_created, 0);
    }

    #[tokio::test]
    async fn per_user_cap_bounds_groups_per_run() {
        let mut conn = test_db();
        for i in 0..8 {
            seed_candidate(&mut conn, "u1", &format!("note {i}"));
        }

        let config = DistillConfig {
            group_size: 2,
            per_user_cap: 1,
            ..DistillConfig::default()
        };
        let result =
            run_distillation(&mut conn, &LifecycleConfig::default(), &config, None).await;
        assert_eq!(result.groups_created, 1);
    }
}
