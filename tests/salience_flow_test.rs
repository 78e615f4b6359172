//! The access-frequency loop: touches feed counters, aggregation turns
//! counters into bounded salience scores and consumes them.

mod helpers;

use engram::config::SalienceConfig;
use engram::memory::records::{frequency_prefix, touch_access};
use engram::memory::salience::aggregate_salience;
use engram::store::fast::LocalFastStore;
use engram::store::FastStore;
use helpers::{seed_memory, test_db};
use rusqlite::params;

fn score_of(conn: &rusqlite::Connection, id: &str) -> f64 {
    conn.query_row(
        "SELECT salience_score FROM memories WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .unwrap()
}

#[tokio::test]
async fn touches_translate_into_bounded_scores() {
    let mut conn = test_db();
    let fast = LocalFastStore::new();
    let hot = seed_memory(&mut conn, "u1", "hot", "v");
    let cold = seed_memory(&mut conn, "u1", "cold", "v");

    for _ in 0..10 {
        touch_access(&fast, &conn, "u1", &hot.id).await.unwrap();
    }
    touch_access(&fast, &conn, "u1", &cold.id).await.unwrap();

    aggregate_salience(&fast, &mut conn, &SalienceConfig::default()).await;

    let hot_score = score_of(&conn, &hot.id);
    let cold_score = score_of(&conn, &cold.id);
    assert!((hot_score - 1.25).abs() < 1e-9);
    assert!(cold_score < hot_score);
    assert!((0.8..=1.25).contains(&cold_score));

    // Counters were consumed; a second run with no new touches changes nothing
    assert!(fast
        .scan_prefix(&frequency_prefix("u1"))
        .await
        .unwrap()
        .is_empty());
    aggregate_salience(&fast, &mut conn, &SalienceConfig::default()).await;
    assert!((score_of(&conn, &hot.id) - hot_score).abs() < 1e-9);
}

#[tokio::test]
async fn untouched_memories_keep_their_score()  {
    let mut conn = test_db();
    let fast = LocalFastStore::new();
    let touched = seed_memory(&mut conn, "u1", "touched", "v");
    let untouched = seed_memory(&mut conn, "u1", "untouched", "v");

    touch_access(&fast, &conn, "u1", &touched.id).await.unwrap();
    aggregate_salience(&fast, &mut conn, &SalienceConfig::default()).await;

    // Creation default survives for the memory with no counter
    assert!((score_of(&conn, &untouched.id) - 1.0).abs() < 1e-9);
}
