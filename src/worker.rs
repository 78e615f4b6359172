//! Background worker — the three maintenance jobs on independent schedules.
//!
//! One process, three interval loops: salience aggregation, lifecycle
//! maintenance, distillation. Each tick runs one pass and logs its summary;
//! job-level failures are swallowed so a bad tick never kills the loop.
//! The passes target stable predicates rather than queues, so an overlapping
//! or repeated run converges instead of duplicating work.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::config::EngramConfig;
use crate::memory::{distill, lifecycle, salience};
use crate::store::{FastStore, Summarizer};

pub struct Worker {
    config: EngramConfig,
    fast: Arc<dyn FastStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl Worker {
    pub fn new(
        config: EngramConfig,
        fast: Arc<dyn FastStore>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        Self {
            config,
            fast,
            summarizer,
        }
    }

    /// Run all three job loops until the process is stopped.
    ///
    /// Each loop holds its own database connection; writes interleave
    /// through WAL.
    pub async fn run(self) -> Result<()> {
        let db_path = self.config.resolved_db_path();
        let mut salience_conn =
            crate::db::open_database(&db_path).context("opening salience job database")?;
        let lifecycle_conn =
            crate::db::open_database(&db_path).context("opening lifecycle job database")?;
        let mut distill_conn =
            crate::db::open_database(&db_path).context("opening distillation job database")?;

        tracing::info!(
            salience_interval_secs = self.config.worker.salience_interval_secs,
            lifecycle_interval_secs = self.config.worker.lifecycle_interval_secs,
            distill_interval_secs = self.config.worker.distill_interval_secs,
            "worker started"
        );

        let salience_loop = async {
            let mut ticker = interval(self.config.worker.salience_interval_secs);
            loop {
                ticker.tick().await;
                salience::aggregate_salience(
                    self.fast.as_ref(),
                    &mut salience_conn,
                    &self.config.salience,
                )
                .await;
            }
        };

        let lifecycle_loop = async {
            let mut ticker = interval(self.config.worker.lifecycle_interval_secs);
            loop {
                ticker.tick().await;
                lifecycle::run_lifecycle(&lifecycle_conn, &self.config.lifecycle);
            }
        };

        let distill_loop = async {
            let mut ticker = interval(self.config.worker.distill_interval_secs);
            loop {
                ticker.tick().await;
                distill::run_distillation(
                    &mut distill_conn,
                    &self.config.lifecycle,
                    &self.config.distill,
                    self.summarizer.as_deref(),
                )
                .await;
            }
        };

        tokio::join!(salience_loop, lifecycle_loop, distill_loop);
        unreachable!("job loops never return")
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
