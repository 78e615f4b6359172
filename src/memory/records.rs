//! Record write/read path — validation, conflict detection, updates, and
//! access tracking.
//!
//! [`create_memory`] is the single entry point for new records. It runs
//! inside a transaction: validate required fields, detect a divergent record
//! under the same title (the new record then enters as `candidate` with
//! `conflict_with` wired both ways), insert, done. Mutating updates go
//! through [`update_memory`], which snapshots the prior content first.

use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::types::{
    LifecycleState, MemoryRecord, MemoryType, Priority, Sensitivity, SensitivityLevel, SourceType,
    StructuredValue, Trust, UserFlags,
};
use crate::memory::versions::snapshot_before_write;
use crate::store::FastStore;

/// Column list shared by every `SELECT` that maps a full [`MemoryRecord`].
pub(crate) const RECORD_COLUMNS: &str = "id, user_id, title, value, structured_value, type, \
     source_type, priority, salience_score, trust_confidence, trust_last_confirmed_at, \
     trust_conflict_count, lifecycle_state, archived_at, undo_expiry_at, pinned, quiet, \
     ephemeral, require_confirm, sensitivity_level, pii_types, decay_half_life_days, \
     last_accessed_at, created_at, updated_at, model_version, distilled_id, original_ids, \
     conflict_with";

/// Input for [`create_memory`].
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub title: String,
    pub value: String,
    pub structured_value: Option<StructuredValue>,
    pub memory_type: MemoryType,
    pub source_type: SourceType,
    pub priority: Priority,
    pub flags: UserFlags,
    pub sensitivity: Sensitivity,
    /// `None` leaves the column NULL; scoring then uses the default estimate.
    pub trust_confidence: Option<f64>,
    pub decay_half_life_days: f64,
    pub model_version: Option<String>,
}

impl NewMemory {
    /// A plain user-sourced fact with default quality signals.
    pub fn fact(user_id: &str, title: &str, value: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            value: value.to_string(),
            structured_value: None,
            memory_type: MemoryType::Fact,
            source_type: SourceType::User,
            priority: Priority::Normal,
            flags: UserFlags::default(),
            sensitivity: Sensitivity::default(),
            trust_confidence: None,
            decay_half_life_days: 30.0,
            model_version: None,
        }
    }
}

/// Create a new memory record.
///
/// Enters as `active` unless a live record with the same title but a
/// different value already exists for this user, in which case the new
/// record enters as `candidate` and both sides get `conflict_with` set.
/// Conflicts are recorded, never raised.
pub fn create_memory(conn: &mut Connection, new: &NewMemory) -> MemoryResult<MemoryRecord> {
    if new.user_id.trim().is_empty() {
        return Err(MemoryError::Validation("user_id is required".into()));
    }
    if new.title.trim().is_empty() {
        return Err(MemoryError::Validation("title is required".into()));
    }

    let tx = conn.transaction()?;
    let now = chrono::Utc::now().to_rfc3339();
    let id = uuid::Uuid::now_v7().to_string();

    // Divergent value under the same title?
    let conflicting: Option<(String, String)> = tx
        .query_row(
            "SELECT id, value FROM memories \
             WHERE user_id = ?1 AND title = ?2 \
               AND lifecycle_state NOT IN ('archived', 'distilled') \
             ORDER BY created_at DESC LIMIT 1",
            params![new.user_id, new.title],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (state, conflict_with) = match conflicting {
        Some((existing_id, existing_value)) if existing_value != new.value => {
            // The conflict bump mutates trust, so the prior state is
            // snapshotted like any other trust write
            let existing = fetch_record(&tx, &existing_id)?.ok_or_else(|| {
                MemoryError::NotFound(format!("memory not found: {existing_id}"))
            })?;
            snapshot_before_write(&tx, &existing, "conflict")?;
            tx.execute(
                "UPDATE memories SET trust_conflict_count = trust_conflict_count + 1, \
                 conflict_with = ?1, updated_at = ?2 WHERE id = ?3",
                params![id, now, existing_id],
            )?;
            (LifecycleState::Candidate, Some(existing_id))
        }
        _ => (LifecycleState::Active, None),
    };

    let structured_json = new
        .structured_value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let pii_json = serde_json::to_string(&new.sensitivity.pii_types)?;

    tx.execute(
        "INSERT INTO memories (id, user_id, title, value, structured_value, type, source_type, \
         priority, salience_score, trust_confidence, trust_conflict_count, lifecycle_state, \
         pinned, quiet, ephemeral, require_confirm, sensitivity_level, pii_types, \
         decay_half_life_days, created_at, updated_at, model_version, conflict_with) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1.0, ?9, 0, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
         ?17, ?18, ?18, ?19, ?20)",
        params![
            id,
            new.user_id,
            new.title,
            new.value,
            structured_json,
            new.memory_type.as_str(),
            new.source_type.as_str(),
            new.priority.as_str(),
            new.trust_confidence,
            state.as_str(),
            new.flags.pinned,
            new.flags.quiet,
            new.flags.ephemeral,
            new.flags.require_confirm,
            new.sensitivity.level.as_str(),
            pii_json,
            new.decay_half_life_days,
            now,
            new.model_version,
            conflict_with,
        ],
    )?;

    let record = fetch_record(&tx, &id)?
        .ok_or_else(|| MemoryError::NotFound(format!("memory not found after insert: {id}")))?;
    tx.commit()?;
    Ok(record)
}

/// Fetch a record, verifying ownership. A mismatched owner reads as absent.
pub fn get_memory(conn: &Connection, user_id: &str, id: &str) -> MemoryResult<MemoryRecord> {
    let record = fetch_record(conn, id)?;
    match record {
        Some(r) if r.user_id == user_id => Ok(r),
        _ => Err(MemoryError::NotFound(format!("memory not found: {id}"))),
    }
}

/// Explicit confirmation: `candidate → active`, stamps
/// `trust_last_confirmed_at` (snapshotting the prior trust state first).
/// Confirming a non-candidate is a no-op read.
pub fn confirm_memory(
    conn: &mut Connection,
    user_id: &str,
    id: &str,
) -> MemoryResult<MemoryRecord> {
    let record = get_memory(conn, user_id, id)?;
    if record.lifecycle_state != LifecycleState::Candidate {
        return Ok(record);
    }

    let tx = conn.transaction()?;
    snapshot_before_write(&tx, &record, "confirm")?;
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE memories SET lifecycle_state = 'active', trust_last_confirmed_at = ?1, \
         updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    tx.commit()?;
    get_memory(conn, user_id, id)
}

/// Update a record's content. The prior `{value, structured_value, trust}`
/// is snapshotted before the overwrite, tagged with `change_reason`.
pub fn update_memory(
    conn: &mut Connection,
    user_id: &str,
    id: &str,
    value: &str,
    structured_value: Option<&StructuredValue>,
    change_reason: &str,
) -> MemoryResult<MemoryRecord> {
    if value.trim().is_empty() {
        return Err(MemoryError::Validation("value is required".into()));
    }
    let record = get_memory(conn, user_id, id)?;

    let tx = conn.transaction()?;
    snapshot_before_write(&tx, &record, change_reason)?;

    let structured_json = structured_value.map(serde_json::to_string).transpose()?;
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE memories SET value = ?1, structured_value = ?2, updated_at = ?3 WHERE id = ?4",
        params![value, structured_json, now, id],
    )?;
    let updated = fetch_record(&tx, id)?
        .ok_or_else(|| MemoryError::NotFound(format!("memory not found: {id}")))?;
    tx.commit()?;
    Ok(updated)
}

/// Record an access: bump the frequency counter in the fast store and stamp
/// `last_accessed_at`. Counter failures are swallowed — losing one increment
/// is cheaper than failing the turn.
pub async fn touch_access(
    fast: &dyn FastStore,
    conn: &Connection,
    user_id: &str,
    id: &str,
) -> MemoryResult<()> {
    let key = frequency_key(user_id, id);
    if let Err(error) = fast.incr(&key).await {
        tracing::warn!(%key, %error, "frequency counter increment failed");
    }

    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE memories SET last_accessed_at = ?1 WHERE id = ?2 AND user_id = ?3",
        params![now, id, user_id],
    )?;
    if changed == 0 {
        return Err(MemoryError::NotFound(format!("memory not found: {id}")));
    }
    Ok(())
}

/// Frequency counter key for one `(user, memory)` pair.
pub fn frequency_key(user_id: &str, memory_id: &str) -> String {
    format!("freq:{user_id}:{memory_id}")
}

/// Prefix covering all of one user's frequency counters.
pub fn frequency_prefix(user_id: &str) -> String {
    format!("freq:{user_id}:")
}

// ── Row mapping ──────────────────────────────────────────────────────────────

pub(crate) fn fetch_record(conn: &Connection, id: &str) -> MemoryResult<Option<MemoryRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

fn parse_field<T: FromStr<Err = String>>(idx: usize, raw: String) -> rusqlite::Result<T> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    })
    .transpose()
}

/// Map a row selected with [`RECORD_COLUMNS`] to a [`MemoryRecord`].
pub(crate) fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let memory_type: MemoryType = parse_field(5, row.get::<_, String>(5)?)?;
    let source_type: SourceType = parse_field(6, row.get::<_, String>(6)?)?;
    let priority: Priority = parse_field(7, row.get::<_, String>(7)?)?;
    let lifecycle_state: LifecycleState = parse_field(12, row.get::<_, String>(12)?)?;
    let sensitivity_level: SensitivityLevel = parse_field(19, row.get::<_, String>(19)?)?;

    let structured_value: Option<StructuredValue> = parse_json(4, row.get(4)?)?;
    let pii_types: Option<Vec<String>> = parse_json(20, row.get(20)?)?;
    let original_ids: Option<Vec<String>> = parse_json(27, row.get(27)?)?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        value: row.get(3)?,
        structured_value,
        memory_type,
        source_type,
        priority,
        salience_score: row.get(8)?,
        trust: Trust {
            confidence: row.get(9)?,
            last_confirmed_at: row.get(10)?,
            conflict_count: row.get(11)?,
        },
        lifecycle_state,
        archived_at: row.get(13)?,
        undo_expiry_at: row.get(14)?,
        flags: UserFlags {
            pinned: row.get(15)?,
            quiet: row.get(16)?,
            ephemeral: row.get(17)?,
            require_confirm: row.get(18)?,
        },
        sensitivity: Sensitivity {
            level: sensitivity_level,
            pii_types: pii_types.unwrap_or_default(),
        },
        decay_half_life_days: row.get(21)?,
        last_accessed_at: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
        model_version: row.get(25)?,
        distilled_id: row.get(26)?,
        original_ids,
        conflict_with: row.get(28)?,
    })
}
