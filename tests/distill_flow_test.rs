//! Distillation through the scan path: grouping, lineage, idempotency.

mod helpers;

use engram::config::{DistillConfig, LifecycleConfig};
use engram::memory::distill::run_distillation;
use engram::memory::records::get_memory;
use engram::memory::types::LifecycleState;
use helpers::{backdate, seed_memory, set_salience, test_db};
use rusqlite::params;

fn make_distillable(conn: &rusqlite::Connection, id: &str) {
    backdate(conn, id, 90);
    set_salience(conn, id, 0.85);
    conn.execute(
        "UPDATE memories SET lifecycle_state = 'aging' WHERE id = ?1",
        params![id],
    )
    .unwrap();
}

#[tokio::test]
async fn scan_distills_backlog_and_is_idempotent() {
    let mut conn = test_db();
    let lifecycle = LifecycleConfig::default();
    let config = DistillConfig::default();

    let mut ids = Vec::new();
    for i in 0..3 {
        let record = seed_memory(&mut conn, "u1", &format!("stale {i}"), "detail");
        make_distillable(&conn, &record.id);
        ids.push(record.id);
    }

    let first = run_distillation(&mut conn, &lifecycle, &config, None).await;
    assert_eq!(first.groups_created, 1);

    for id in &ids {
        let original = get_memory(&conn, "u1", id).unwrap();
        assert!(original.distilled_id.is_some());
        assert_eq!(original.lifecycle_state, LifecycleState::Archived);
    }

    // The summary is an active derived record carrying lineage
    let summary_id: String = conn
        .query_row(
            "SELECT id FROM memories WHERE type = 'distilled'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let summary = get_memory(&conn, "u1", &summary_id).unwrap();
    assert_eq!(summary.lifecycle_state, LifecycleState::Active);
    assert_eq!(summary.original_ids.as_ref().unwrap().len(), 3);
    assert!((0.8..=1.25).contains(&summary.salience_score));

    // A second scan finds nothing left to distill
    let second = run_distillation(&mut conn, &lifecycle, &config, None).await;
    assert_eq!(second.groups_created, 0);
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
async fn users_do_not_share_groups() {
    let mut conn = test_db();
    for user in ["u1", "u2"] {
        for i in 0..2 {
            let record = seed_memory(&mut conn, user, &format!("stale {i}"), "detail");
            make_distillable(&conn, &record.id);
        }
    }

    let result = run_distillation(
        &mut conn,
        &LifecycleConfig::default(),
        &DistillConfig::default(),
        None,
    )
    .await;
    assert_eq!(result.users_processed, 2);
    assert_eq!(result.groups_created, 2);

    let owners: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT user_id FROM memories WHERE type = 'distilled' ORDER BY user_id")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    };
    assert_eq!(owners, vec!["u1".to_string(), "u2".to_string()]);
}

#[tokio::test]
async fn global_cap_bounds_one_scan() {
    let mut conn = test_db();
    for user in ["u1", "u2", "u3"] {
        for i in 0..2 {
            let record = seed_memory(&mut conn, user, &format!("stale {i}"), "detail");
            make_distillable(&conn, &record.id);
        }
    }

    let config = DistillConfig {
        global_cap: 2,
        ..DistillConfig::default()
    };
    let result =
        run_distillation(&mut conn, &LifecycleConfig::default(), &config, None).await;
    assert_eq!(result.groups_created, 2);
}
