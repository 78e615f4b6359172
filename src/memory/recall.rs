//! Recall gating — decides which similarity candidates reach the context.
//!
//! Every candidate gets a composite score
//! (`similarity * salience * trust_confidence`) and a gate decision against
//! three thresholds. Every candidate, gated or not, lands in the
//! [`RecallEvent`] audit trail with its raw factors; only injected ones
//! feed `top_score`/`avg_score`. Restricted-sensitivity memories are always
//! gated and logged to the PII audit. Feedback arrives later through
//! [`record_feedback`] and is the only writer of `accepted`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::GatingConfig;
use crate::errors::{MemoryError, MemoryResult};
use crate::memory::records::{fetch_record, get_memory};
use crate::memory::types::{
    MemoryRecord, PiiAuditEntry, RecallEvent, ScoreEntry, SensitivityLevel,
};
use crate::memory::versions::snapshot_before_write;

/// One vector-similarity candidate entering the gate.
#[derive(Debug, Clone)]
pub struct RecallCandidate {
    pub memory_id: String,
    /// Cosine similarity in `[0.0, 1.0]` from the vector store.
    pub similarity: f64,
}

/// A candidate that passed the gate.
#[derive(Debug, Clone, Serialize)]
pub struct InjectedMemory {
    pub record: MemoryRecord,
    pub similarity: f64,
    pub composite: f64,
}

/// Result of gating one candidate set.
#[derive(Debug, Serialize)]
pub struct GateOutcome {
    /// Persisted [`RecallEvent`] id for later feedback.
    pub event_id: String,
    pub injected: Vec<InjectedMemory>,
    pub scores: Vec<ScoreEntry>,
}

/// Score and gate a candidate set, persisting the full audit trail.
///
/// Candidates whose record no longer exists (stale vector entries) are
/// dropped from both the context and the event.
pub fn gate_candidates(
    conn: &Connection,
    config: &GatingConfig,
    user_id: &str,
    query_text: &str,
    candidates: &[RecallCandidate],
) -> MemoryResult<GateOutcome> {
    let mut injected = Vec::new();
    let mut scores = Vec::new();
    let mut near_miss_salience = 0u32;
    let mut near_miss_trust = 0u32;
    let mut near_miss_composite = 0u32;

    for candidate in candidates {
        let Some(record) = fetch_record(conn, &candidate.memory_id)? else {
            tracing::warn!(memory_id = %candidate.memory_id, "stale recall candidate; dropped");
            continue;
        };
        if record.user_id != user_id {
            tracing::warn!(memory_id = %record.id, "recall candidate owned by another user; dropped");
            continue;
        }

        let salience = record.salience_score;
        let trust_confidence = record.trust.confidence_estimate();
        let composite = candidate.similarity * salience * trust_confidence;

        let restricted = record.sensitivity.level == SensitivityLevel::Restricted;
        let below_threshold = salience < config.min_salience
            || trust_confidence < config.min_trust
            || composite < config.min_composite;
        let gated = restricted || (config.enabled && below_threshold);

        if restricted {
            write_pii_audit(
                conn,
                user_id,
                Some(&record.id),
                query_text,
                "restricted-recall",
                record.sensitivity.level,
            )?;
        }

        // Near-miss tallies for threshold tuning
        if (salience - config.min_salience).abs() <= config.near_miss_margin {
            near_miss_salience += 1;
        }
        if (trust_confidence - config.min_trust).abs() <= config.near_miss_margin {
            near_miss_trust += 1;
        }
        if (composite - config.min_composite).abs() <= config.near_miss_margin {
            near_miss_composite += 1;
        }

        scores.push(ScoreEntry {
            memory_id: record.id.clone(),
            similarity: candidate.similarity,
            salience,
            trust_confidence,
            priority: record.priority,
            composite,
            gated,
        });

        if !gated {
            injected.push(InjectedMemory {
                record,
                similarity: candidate.similarity,
                composite,
            });
        }
    }

    let injected_composites: Vec<f64> = injected.iter().map(|m| m.composite).collect();
    let top_score = injected_composites
        .iter()
        .cloned()
        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))));
    let avg_score = if injected_composites.is_empty() {
        None
    } else {
        Some(injected_composites.iter().sum::<f64>() / injected_composites.len() as f64)
    };

    let event_id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let gated_count = scores.iter().filter(|s| s.gated).count() as u32;
    conn.execute(
        "INSERT INTO recall_events (id, user_id, query_text, scores, top_score, avg_score, \
         injected_count, gated_count, near_miss_salience, near_miss_trust, near_miss_composite, \
         created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            event_id,
            user_id,
            query_text,
            serde_json::to_string(&scores)?,
            top_score,
            avg_score,
            injected.len() as u32,
            gated_count,
            near_miss_salience,
            near_miss_trust,
            near_miss_composite,
            now,
        ],
    )?;

    Ok(GateOutcome {
        event_id,
        injected,
        scores,
    })
}

/// Apply explicit user feedback to a recall event.
///
/// `accepted = false` with a `corrected_memory_id` also nudges that record's
/// trust confidence and salience down by bounded factors; no other record is
/// touched.
pub fn record_feedback(
    conn: &mut Connection,
    config: &GatingConfig,
    user_id: &str,
    event_id: &str,
    accepted: bool,
    corrected_memory_id: Option<&str>,
) -> MemoryResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE recall_events SET accepted = ?1, responded_at = ?2 \
         WHERE id = ?3 AND user_id = ?4",
        params![accepted, now, event_id, user_id],
    )?;
    if changed == 0 {
        return Err(MemoryError::NotFound(format!(
            "recall event not found: {event_id}"
        )));
    }

    if accepted {
        return Ok(());
    }
    let Some(memory_id) = corrected_memory_id else {
        return Ok(());
    };

    let record = get_memory(conn, user_id, memory_id)?;
    let new_trust =
        (record.trust.confidence_estimate() * (1.0 - config.correction_trust_penalty)).max(0.0);
    let new_salience = (record.salience_score - config.correction_salience_penalty).max(0.8);

    let tx = conn.transaction()?;
    snapshot_before_write(&tx, &record, "feedback")?;
    tx.execute(
        "UPDATE memories SET trust_confidence = ?1, salience_score = ?2, updated_at = ?3 \
         WHERE id = ?4",
        params![new_trust, new_salience, now, memory_id],
    )?;
    tx.commit()?;
    Ok(())
}

/// Load a persisted recall event (owner-checked).
pub fn fetch_recall_event(
    conn: &Connection,
    user_id: &str,
    event_id: &str,
) -> MemoryResult<RecallEvent> {
    let event = conn
        .query_row(
            "SELECT id, user_id, query_text, scores, top_score, avg_score, injected_count, \
             gated_count, near_miss_salience, near_miss_trust, near_miss_composite, accepted, \
             responded_at, created_at FROM recall_events WHERE id = ?1 AND user_id = ?2",
            params![event_id, user_id],
            |row| {
                let scores_raw: String = row.get(3)?;
                let scores: Vec<ScoreEntry> = serde_json::from_str(&scores_raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(RecallEvent {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    query_text: row.get(2)?,
                    scores,
                    top_score: row.get(4)?,
                    avg_score: row.get(5)?,
                    injected_count: row.get(6)?,
                    gated_count: row.get(7)?,
                    near_miss_salience: row.get(8)?,
                    near_miss_trust: row.get(9)?,
                    near_miss_composite: row.get(10)?,
                    accepted: row.get(11)?,
                    responded_at: row.get(12)?,
                    created_at: row.get(13)?,
                })
            },
        )
        .optional()?;
    event.ok_or_else(|| MemoryError::NotFound(format!("recall event not found: {event_id}")))
}

/// All PII audit entries for one user, newest first.
pub fn list_pii_audit(conn: &Connection, user_id: &str) -> MemoryResult<Vec<PiiAuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, memory_id, trigger_text, rule, sensitivity_level, created_at \
         FROM pii_audit WHERE user_id = ?1 ORDER BY id DESC",
    )?;
    let entries = stmt
        .query_map(params![user_id], |row| {
            let level: SensitivityLevel =
                row.get::<_, String>(5)?.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;
            Ok(PiiAuditEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                memory_id: row.get(2)?,
                trigger_text: row.get(3)?,
                rule: row.get(4)?,
                sensitivity_level: level,
                created_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Append a blocked sensitive-memory reference to the PII audit log.
pub(crate) fn write_pii_audit(
    conn: &Connection,
    user_id: &str,
    memory_id: Option<&str>,
    trigger_text: &str,
    rule: &str,
    level: SensitivityLevel,
) -> MemoryResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO pii_audit (user_id, memory_id, trigger_text, rule, sensitivity_level, \
         created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, memory_id, trigger_text, rule, level.as_str(), now],
    )?;
    Ok(())
}
