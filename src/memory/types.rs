//! Core memory type definitions.
//!
//! Defines [`MemoryRecord`] (a durable fact/preference owned by one user),
//! the lifecycle/classification enums, quality-signal structs ([`Trust`],
//! [`UserFlags`], [`Sensitivity`]), and the append-only analytics records
//! ([`VersionSnapshot`], [`RecallEvent`], [`PiiAuditEntry`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trust confidence assumed for records that predate the `trust_confidence`
/// column. Used at scoring time only; never written back.
pub const DEFAULT_TRUST_ESTIMATE: f64 = 0.75;

/// Classification of a memory's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A statement about the world or the user ("lives in Lisbon").
    Fact,
    /// A standing preference ("prefers short answers").
    Preference,
    /// A compacted summary of several low-value memories.
    Distilled,
}

impl MemoryType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Distilled => "distilled",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "distilled" => Ok(Self::Distilled),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Stated directly by the user.
    User,
    /// Written by the system (onboarding, imports).
    System,
    /// Derived from other memories (distillation, inference).
    Derived,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Derived => "derived",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "derived" => Ok(Self::Derived),
            _ => Err(format!("unknown source type: {s}")),
        }
    }
}

/// Retrieval priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    System,
    Critical,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Critical => "critical",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "critical" => Ok(Self::Critical),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(format!("unknown priority: {s}")),
        }
    }
}

/// Lifecycle standing of a memory.
///
/// Transitions move forward only (`candidate → active → aging → archived`),
/// with two explicit exceptions: restore (`archived → active` inside the
/// undo window) and distillation (any non-distilled state `→ archived` with
/// a lineage pointer, plus a fresh `distilled` summary record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Newly created with a conflicting title; awaiting confirmation.
    Candidate,
    /// Confirmed, in normal rotation.
    Active,
    /// Stale or low-salience; still retrievable.
    Aging,
    /// Out of rotation; restorable inside the undo window.
    Archived,
    /// A summary record produced by distillation.
    Distilled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Active => "active",
            Self::Aging => "aging",
            Self::Archived => "archived",
            Self::Distilled => "distilled",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(Self::Candidate),
            "active" => Ok(Self::Active),
            "aging" => Ok(Self::Aging),
            "archived" => Ok(Self::Archived),
            "distilled" => Ok(Self::Distilled),
            _ => Err(format!("unknown lifecycle state: {s}")),
        }
    }
}

/// Trust signals for a memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trust {
    /// Confidence in `[0.0, 1.0]`. `None` on records that predate the field.
    pub confidence: Option<f64>,
    /// ISO 8601 timestamp of the last explicit confirmation.
    pub last_confirmed_at: Option<String>,
    /// Number of divergent-value conflicts seen under the same title.
    pub conflict_count: u32,
}

impl Trust {
    /// Confidence for scoring, falling back to [`DEFAULT_TRUST_ESTIMATE`]
    /// when the field was never persisted.
    pub fn confidence_estimate(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_TRUST_ESTIMATE)
    }
}

/// User-controlled behavior flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserFlags {
    /// Pinned memories are excluded from automatic aging.
    pub pinned: bool,
    /// Quiet memories are retrievable but never volunteered proactively.
    pub quiet: bool,
    /// Ephemeral memories are fair game for aggressive cleanup.
    pub ephemeral: bool,
    /// The agent must re-confirm before acting on this memory.
    pub require_confirm: bool,
}

/// Sensitivity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    Public,
    Personal,
    /// Never injected into context; references are logged to the PII audit.
    Restricted,
}

impl SensitivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Personal => "personal",
            Self::Restricted => "restricted",
        }
    }
}

impl std::str::FromStr for SensitivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "personal" => Ok(Self::Personal),
            "restricted" => Ok(Self::Restricted),
            _ => Err(format!("unknown sensitivity level: {s}")),
        }
    }
}

/// Sensitivity level plus the PII categories detected in the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensitivity {
    pub level: SensitivityLevel,
    pub pii_types: Vec<String>,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            level: SensitivityLevel::Public,
            pii_types: Vec::new(),
        }
    }
}

/// Typed structured payload attached to a memory.
///
/// Known shapes get a variant; anything else rides in `Extension` so new
/// producers can ship fields before this enum learns about them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StructuredValue {
    Text(String),
    KeyValue(BTreeMap<String, String>),
    TaskList(Vec<String>),
    Extension(serde_json::Map<String, serde_json::Value>),
}

/// A durable memory record owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Full text content.
    pub value: String,
    pub structured_value: Option<StructuredValue>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub source_type: SourceType,
    pub priority: Priority,
    /// Bounded importance score in `[0.8, 1.25]`; 1.0 at creation.
    pub salience_score: f64,
    pub trust: Trust,
    pub lifecycle_state: LifecycleState,
    /// Set when the record entered `archived`.
    pub archived_at: Option<String>,
    /// Restore deadline: `archived_at` plus the undo window.
    pub undo_expiry_at: Option<String>,
    pub flags: UserFlags,
    pub sensitivity: Sensitivity,
    /// Salience half-life in days; input to decay tuning.
    pub decay_half_life_days: f64,
    pub last_accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Version of the model that produced a derived record, if any.
    pub model_version: Option<String>,
    /// Summary this record was distilled into. At most one, ever.
    pub distilled_id: Option<String>,
    /// On a `distilled` summary: the originals it covers.
    pub original_ids: Option<Vec<String>>,
    /// A divergent record holding the same title for the same user.
    pub conflict_with: Option<String>,
}

/// Immutable copy of a record's mutable content, taken before every
/// mutating update. Never modified or deleted after insert.
#[derive(Debug, Clone, Serialize)]
pub struct VersionSnapshot {
    pub id: i64,
    pub memory_id: String,
    pub value: String,
    pub structured_value: Option<StructuredValue>,
    pub trust: Trust,
    /// Human-readable cause: "update", "restore", "feedback", ...
    pub change_reason: String,
    pub created_at: String,
}

/// Per-candidate scoring factors recorded in a [`RecallEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub memory_id: String,
    pub similarity: f64,
    pub salience: f64,
    pub trust_confidence: f64,
    pub priority: Priority,
    pub composite: f64,
    /// `true` when the candidate was excluded from the final context.
    pub gated: bool,
}

/// One retrieval query's full audit trail.
///
/// Written once by the recall gate; `accepted`/`responded_at` are filled in
/// later by explicit user feedback, never by the retrieval path itself.
#[derive(Debug, Clone, Serialize)]
pub struct RecallEvent {
    pub id: String,
    pub user_id: String,
    pub query_text: String,
    pub scores: Vec<ScoreEntry>,
    /// Highest composite among injected candidates.
    pub top_score: Option<f64>,
    /// Mean composite among injected candidates.
    pub avg_score: Option<f64>,
    pub injected_count: u32,
    pub gated_count: u32,
    pub near_miss_salience: u32,
    pub near_miss_trust: u32,
    pub near_miss_composite: u32,
    /// Tri-state: `None` until feedback arrives.
    pub accepted: Option<bool>,
    pub responded_at: Option<String>,
    pub created_at: String,
}

/// Append-only log entry for a blocked sensitive-memory reference.
#[derive(Debug, Clone, Serialize)]
pub struct PiiAuditEntry {
    pub id: i64,
    pub user_id: String,
    pub memory_id: Option<String>,
    pub trigger_text: String,
    pub rule: String,
    pub sensitivity_level: SensitivityLevel,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn lifecycle_state_round_trips() {
        for s in ["candidate", "active", "aging", "archived", "distilled"] {
            assert_eq!(LifecycleState::from_str(s).unwrap().as_str(), s);
        }
        assert!(LifecycleState::from_str("zombie").is_err());
    }

    #[test]
    fn trust_estimate_defaults_when_unknown() {
        let trust = Trust::default();
        assert!((trust.confidence_estimate() - DEFAULT_TRUST_ESTIMATE).abs() < f64::EPSILON);

        let known = Trust {
            confidence: Some(0.9),
            ..Trust::default()
        };
        assert!((known.confidence_estimate() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn structured_value_serde_tagging() {
        let sv = StructuredValue::TaskList(vec!["a".into(), "b".into()]);
        let json = serde_json::to_value(&sv).unwrap();
        assert_eq!(json["kind"], "task_list");

        let back: StructuredValue = serde_json::from_value(json).unwrap();
        match back {
            StructuredValue::TaskList(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
