//! CLI job commands — run the background worker, or each maintenance job
//! once for cron-style scheduling and debugging.

use anyhow::Result;
use std::sync::Arc;

use crate::config::EngramConfig;
use crate::memory::{distill, lifecycle, salience};
use crate::store::fast::LocalFastStore;
use crate::worker::Worker;

/// Start the long-running worker with all three job loops.
pub async fn worker(config: EngramConfig) -> Result<()> {
    let fast = Arc::new(LocalFastStore::new());
    Worker::new(config, fast, None).run().await
}

/// Run one salience aggregation pass.
///
/// Counters live in the process-local fast store, so a one-shot invocation
/// only sees counters written by this process; it exists for smoke-testing
/// a deployment wired to an external store.
pub async fn salience_once(config: &EngramConfig) -> Result<()> {
    let mut conn = crate::db::open_database(&config.resolved_db_path())?;
    let fast = LocalFastStore::new();

    let result = salience::aggregate_salience(&fast, &mut conn, &config.salience).await;
    println!(
        "Salience aggregation: {} users processed, {} skipped, {} memories updated, {} counters cleared.",
        result.users_processed, result.users_skipped, result.memories_updated, result.counters_cleared,
    );
    Ok(())
}

/// Run one lifecycle maintenance pass.
pub fn lifecycle_once(config: &EngramConfig) -> Result<()> {
    let conn = crate::db::open_database(&config.resolved_db_path())?;

    let result = lifecycle::run_lifecycle(&conn, &config.lifecycle);
    println!(
        "Lifecycle maintenance: {} moved to aging, {} archived, {} failed.",
        result.moved_to_aging, result.archived, result.failed,
    );
    Ok(())
}

/// Run one distillation scan.
pub async fn distill_once(config: &EngramConfig) -> Result<()> {
    let mut conn = crate::db::open_database(&config.resolved_db_path())?;

    let result =
        distill::run_distillation(&mut conn, &config.lifecycle, &config.distill, None).await;
    println!(
        "Distillation: {} users scanned, {} groups created, {} skipped, {} failed.",
        result.users_processed, result.groups_created, result.groups_skipped, result.failed,
    );
    Ok(())
}
