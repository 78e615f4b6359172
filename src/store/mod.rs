//! Narrow contracts for the external collaborators.
//!
//! The coordinator never talks to a storage engine directly — every tier is
//! behind one of these traits: a fast TTL key-value store (session history,
//! frequency counters, short-lived caches), a vector index (semantic
//! similarity), a graph database (relationship facts), and a best-effort
//! text summarizer. Drivers for hosted services live with their deployments;
//! this crate ships only the in-process [`fast::LocalFastStore`].

pub mod fast;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Fast key-value store with TTL support.
///
/// Counter keys use atomic increment semantics; the salience aggregator is
/// the only deleter and always reads before deleting.
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Atomically increment a numeric key, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// All live `(key, value)` pairs whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// One similarity hit from the vector index.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity in `[0.0, 1.0]`.
    pub score: f64,
    pub metadata: serde_json::Value,
}

/// Vector similarity index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Driver name used in skip/degradation reports (e.g. `"pinecone"`).
    fn name(&self) -> &str;
    async fn upsert(&self, id: &str, embedding: &[f32], metadata: serde_json::Value)
        -> Result<()>;
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<VectorMatch>>;
    async fn delete(&self, filter: serde_json::Value) -> Result<()>;
}

/// A structured relationship fact for one user.
#[derive(Debug, Clone)]
pub struct GraphFact {
    pub relation: String,
    pub target_name: String,
}

/// Graph database holding relationship facts.
///
/// The query language is the driver's business; the core only needs
/// `{relation, target_name}` pairs per user.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Driver name used in skip/degradation reports (e.g. `"neo4j"`).
    fn name(&self) -> &str;
    async fn facts_for_user(&self, user_id: &str) -> Result<Vec<GraphFact>>;
}

/// Best-effort text summarization collaborator. May be absent entirely;
/// callers must have a deterministic fallback.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, items: &[String], char_limit: usize) -> Result<String>;
}
