//! Salience aggregation — frequency counters in, bounded importance out.
//!
//! Scans all `freq:{user}:{memory}` counters in the fast store, normalizes
//! each user's counts on a log scale (`ln(1+freq) / ln(1+max_freq)`), maps
//! the result into the bounded salience band, writes the scores, and then
//! deletes the consumed counters.
//!
//! Consumption is read-then-delete: increments that land between the read
//! and the delete are lost for this cycle only and re-counted next cycle.
//! A crash mid-run leaves the surviving counters intact, so re-running is
//! safe. Per-user failures are skipped; the job never raises to its
//! scheduler.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::SalienceConfig;
use crate::store::FastStore;

/// Aggregate summary for one salience run.
#[derive(Debug, Default, Serialize)]
pub struct SalienceRunResult {
    pub users_processed: usize,
    pub users_skipped: usize,
    pub memories_updated: usize,
    pub counters_cleared: usize,
}

/// Map a raw access count into the salience band.
///
/// `max_freq` is the per-user maximum for this cycle; the most-touched
/// memory always lands on the band's ceiling. Rounded to 4 decimals.
pub fn salience_for_count(config: &SalienceConfig, freq: i64, max_freq: i64) -> f64 {
    let norm = ((1 + freq.max(0)) as f64).ln() / ((1 + max_freq.max(1)) as f64).ln();
    let raw = config.base + norm * config.span;
    let clamped = raw.clamp(config.base, config.base + config.span);
    (clamped * 10_000.0).round() / 10_000.0
}

/// Run one aggregation cycle over every user with pending counters.
pub async fn aggregate_salience(
    fast: &dyn FastStore,
    conn: &mut Connection,
    config: &SalienceConfig,
) -> SalienceRunResult {
    let mut result = SalienceRunResult::default();

    let pairs = match fast.scan_prefix("freq:").await {
        Ok(pairs) => pairs,
        Err(error) => {
            tracing::warn!(%error, "frequency counter scan failed; skipping salience run");
            return result;
        }
    };

    // Group counters per user; malformed keys or values are dropped.
    let mut per_user: BTreeMap<String, Vec<(String, i64)>> = BTreeMap::new();
    for (key, raw) in pairs {
        let Some(rest) = key.strip_prefix("freq:") else {
            continue;
        };
        let Some((user_id, memory_id)) = rest.split_once(':') else {
            tracing::warn!(%key, "malformed frequency counter key");
            continue;
        };
        let Ok(count) = raw.parse::<i64>() else {
            tracing::warn!(%key, %raw, "non-numeric frequency counter");
            continue;
        };
        per_user
            .entry(user_id.to_string())
            .or_default()
            .push((memory_id.to_string(), count));
    }

    for (user_id, counts) in per_user {
        match aggregate_user(fast, conn, config, &user_id, &counts).await {
            Ok((updated, cleared)) => {
                result.users_processed += 1;
                result.memories_updated += updated;
                result.counters_cleared += cleared;
            }
            Err(error) => {
                tracing::warn!(%user_id, %error, "salience aggregation failed for user; skipped");
                result.users_skipped += 1;
            }
        }
    }

    tracing::info!(
        users_processed = result.users_processed,
        users_skipped = result.users_skipped,
        memories_updated = result.memories_updated,
        "salience aggregation complete"
    );
    result
}

/// Score and clear one user's counters. Counters are deleted only after all
/// score writes for the user succeeded.
async fn aggregate_user(
    fast: &dyn FastStore,
    conn: &Connection,
    config: &SalienceConfig,
    user_id: &str,
    counts: &[(String, i64)],
) -> anyhow::Result<(usize, usize)> {
    let max_freq = counts.iter().map(|(_, c)| *c).max().unwrap_or(1);
    let now = chrono::Utc::now().to_rfc3339();

    let mut updated = 0;
    for (memory_id, freq) in counts {
        let salience = salience_for_count(config, *freq, max_freq);
        let changed = conn.execute(
            "UPDATE memories SET salience_score = ?1, updated_at = ?2 \
             WHERE id = ?3 AND user_id = ?4",
            params![salience, now, memory_id, user_id],
        )?;
        // A counter for a deleted memory is stale, not an error
        updated += changed;
    }

    let mut cleared = 0;
    for (memory_id, _) in counts {
        fast.delete(&crate::memory::records::frequency_key(user_id, memory_id))
            .await?;
        cleared += 1;
    }

    Ok((updated, cleared))
}
