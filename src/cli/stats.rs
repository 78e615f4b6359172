use anyhow::Result;

use crate::config::EngramConfig;

/// Display memory store statistics in the terminal.
pub fn stats(config: &EngramConfig, user_id: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = crate::db::open_database(&db_path)?;

    let response = crate::memory::stats::memory_stats(&conn, user_id, Some(&db_path))?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", response.total_memories);
    println!("  Pinned:              {}", response.pinned_memories);
    println!();

    println!("By Lifecycle State:");
    for state in &["candidate", "active", "aging", "archived", "distilled"] {
        let count = response.by_lifecycle_state.get(*state).copied().unwrap_or(0);
        println!("  {:<12} {}", state, count);
    }
    println!();

    println!("By Type:");
    for t in &["fact", "preference", "distilled"] {
        let count = response.by_type.get(*t).copied().unwrap_or(0);
        println!("  {:<12} {}", t, count);
    }
    println!();

    println!("Version snapshots:     {}", response.version_snapshots);
    println!("Recall events:         {}", response.recall_events);
    println!("PII audit entries:     {}", response.pii_audit_entries);
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_memory {
        println!("Oldest memory:         {oldest}");
    }
    if let Some(ref newest) = response.newest_memory {
        println!("Newest memory:         {newest}");
    }

    Ok(())
}
