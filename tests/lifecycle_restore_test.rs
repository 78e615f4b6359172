//! End-to-end lifecycle progression and the restore undo window.

mod helpers;

use engram::config::LifecycleConfig;
use engram::memory::lifecycle::run_lifecycle;
use engram::memory::records::get_memory;
use engram::memory::types::LifecycleState;
use engram::memory::versions::restore_memory;
use helpers::{backdate, lifecycle_state, seed_memory, set_salience, test_db};
use rusqlite::params;

#[test]
fn record_progresses_one_state_per_run_and_restores() {
    let mut conn = test_db();
    let config = LifecycleConfig::default();
    let record = seed_memory(&mut conn, "u1", "old note", "details");
    backdate(&conn, &record.id, 90);
    set_salience(&conn, &record.id, 0.85);

    // Run 1: active → aging only
    run_lifecycle(&conn, &config);
    assert_eq!(lifecycle_state(&conn, &record.id), "aging");

    // Run 2: aging → archived, undo window opens
    run_lifecycle(&conn, &config);
    assert_eq!(lifecycle_state(&conn, &record.id), "archived");
    let archived = get_memory(&conn, "u1", &record.id).unwrap();
    assert!(archived.undo_expiry_at.is_some());

    // Restore inside the window brings it back
    let outcome = restore_memory(&mut conn, "u1", &record.id).unwrap();
    assert!(outcome.restored);
    let restored = get_memory(&conn, "u1", &record.id).unwrap();
    assert_eq!(restored.lifecycle_state, LifecycleState::Active);
    assert!(restored.archived_at.is_none());
}

#[test]
fn restore_past_the_window_leaves_the_record_archived() {
    let mut conn = test_db();
    let record = seed_memory(&mut conn, "u1", "old note", "details");
    let long_ago = (chrono::Utc::now() - chrono::Duration::days(70)).to_rfc3339();
    let expired = (chrono::Utc::now() - chrono::Duration::days(40)).to_rfc3339();
    conn.execute(
        "UPDATE memories SET lifecycle_state = 'archived', archived_at = ?1, \
         undo_expiry_at = ?2 WHERE id = ?3",
        params![long_ago, expired, record.id],
    )
    .unwrap();

    let outcome = restore_memory(&mut conn, "u1", &record.id).unwrap();
    assert!(!outcome.restored);
    assert_eq!(outcome.reason, "undo_window_expired");
    assert_eq!(lifecycle_state(&conn, &record.id), "archived");
}

#[test]
fn never_archived_candidate_cannot_be_restored() {
    let mut conn = test_db();
    // Second divergent value under the same title enters as candidate
    seed_memory(&mut conn, "u1", "city", "Lisbon");
    let candidate = seed_memory(&mut conn, "u1", "city", "Porto");
    assert_eq!(candidate.lifecycle_state, LifecycleState::Candidate);

    let outcome = restore_memory(&mut conn, "u1", &candidate.id).unwrap();
    assert!(!outcome.restored);
    assert_eq!(outcome.reason, "not_archived");
}

#[test]
fn pinned_record_survives_any_staleness() {
    let mut conn = test_db();
    let record = seed_memory(&mut conn, "u1", "keeper", "v");
    conn.execute(
        "UPDATE memories SET pinned = 1 WHERE id = ?1",
        params![record.id],
    )
    .unwrap();
    backdate(&conn, &record.id, 1000);
    set_salience(&conn, &record.id, 0.8);

    let config = LifecycleConfig::default();
    run_lifecycle(&conn, &config);
    run_lifecycle(&conn, &config);
    assert_eq!(lifecycle_state(&conn, &record.id), "active");
}
