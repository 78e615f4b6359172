//! Memory lifecycle and multi-layer retrieval coordination for
//! conversational agents.
//!
//! Engram keeps a per-user store of durable memories and manages their whole
//! life: access frequency feeds a bounded salience score, stale low-salience
//! memories age and archive (with an undo window), archived backlogs distill
//! into summary records with lineage, and every mutation is snapshotted for
//! restore. At request time a gather coordinator fans out to session
//! history, vector recall, and graph facts under per-layer soft time
//! budgets, filtering recall candidates through a composite-score gate with
//! a full audit trail.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization and schema
//! - [`store`] — Contracts for the fast KV store, vector index, graph store, and summarizer
//! - [`memory`] — Core engine: records, salience, lifecycle, gathering, recall gating,
//!   distillation, versions, stats
//! - [`worker`] — Fixed-interval background job loops
//! - [`cli`] — Operational subcommands behind the `engram` binary

pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod memory;
pub mod store;
pub mod worker;
