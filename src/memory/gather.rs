//! Context gathering — fans out to the retrieval layers for one user turn.
//!
//! History and profile are always attempted (cheap fast-store reads with a
//! caller-supplied fallback). The graph and semantic layers are best-effort:
//! each runs under its own soft time budget and is marked skipped rather
//! than awaited past it. The coordinator never raises to its caller; the
//! returned bundle always has well-defined (possibly empty) fields plus the
//! skip report and per-layer timings.

use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{GatingConfig, RetrievalConfig};
use crate::memory::recall::{gate_candidates, InjectedMemory, RecallCandidate};
use crate::store::{FastStore, GraphStore, VectorStore};

/// Elapsed wall time for one retrieval layer.
#[derive(Debug, Serialize)]
pub struct LayerTiming {
    pub layer: &'static str,
    pub elapsed_ms: u64,
}

/// Everything gathered for one turn. Fields degrade to empty, never error.
#[derive(Debug, Default, Serialize)]
pub struct ContextBundle {
    /// Recent session messages, oldest first, trimmed to the char budget.
    pub history: Vec<String>,
    pub profile: String,
    /// Gate-approved semantic memories, strongest composite first.
    pub semantic: Vec<InjectedMemory>,
    pub user_fact_snippets: Vec<String>,
    /// Formatted `relation target` lines, one per fact.
    pub graph_facts: String,
    /// Layer labels that were skipped (store names for external layers).
    pub skipped: Vec<String>,
    pub timings: Vec<LayerTiming>,
    /// Audit event id when the gate ran.
    pub recall_event_id: Option<String>,
}

pub struct ContextGatherer {
    fast: Arc<dyn FastStore>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    retrieval: RetrievalConfig,
    gating: GatingConfig,
}

impl ContextGatherer {
    pub fn new(
        fast: Arc<dyn FastStore>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        retrieval: RetrievalConfig,
        gating: GatingConfig,
    ) -> Self {
        Self {
            fast,
            vector,
            graph,
            retrieval,
            gating,
        }
    }

    /// Assemble the context bundle for one user turn.
    ///
    /// `recent_messages` is the caller's own transcript tail, used when the
    /// fast store has no session history (or fails).
    pub async fn gather(
        &self,
        conn: &Connection,
        user_id: &str,
        query_text: &str,
        query_embedding: &[f32],
        recent_messages: &[String],
    ) -> ContextBundle {
        let mut bundle = ContextBundle::default();

        // History and profile: always attempted, assumed cheap.
        let started = Instant::now();
        bundle.history = self.fetch_history(user_id, recent_messages).await;
        trim_history(&mut bundle.history, self.retrieval.history_char_budget);
        bundle.timings.push(LayerTiming {
            layer: "history",
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        let started = Instant::now();
        bundle.profile = match self.fast.get(&profile_key(user_id)).await {
            Ok(Some(profile)) => profile,
            Ok(None) => String::new(),
            Err(error) => {
                tracing::warn!(%user_id, %error, "profile fetch failed; empty profile");
                String::new()
            }
        };
        bundle.timings.push(LayerTiming {
            layer: "profile",
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        // Graph facts: cache-first, then a hard timeout on the live query.
        let started = Instant::now();
        bundle.graph_facts = self.fetch_graph_facts(user_id, &mut bundle.skipped).await;
        bundle.timings.push(LayerTiming {
            layer: "graph",
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        // Semantic recall, gated; the secondary fact query only runs if the
        // primary left time inside the semantic budget.
        let started = Instant::now();
        self.fetch_semantic(conn, user_id, query_text, query_embedding, &mut bundle)
            .await;
        let semantic_budget = Duration::from_millis(self.retrieval.semantic_budget_ms);
        match semantic_budget.checked_sub(started.elapsed()) {
            Some(remaining) => {
                match tokio::time::timeout(
                    remaining,
                    self.fetch_user_facts(user_id, query_embedding),
                )
                .await
                {
                    Ok(snippets) => bundle.user_fact_snippets = snippets,
                    Err(_) => {
                        tracing::warn!(%user_id, "user fact query over budget");
                        bundle.skipped.push("user-facts".into());
                    }
                }
            }
            None => bundle.skipped.push("user-facts".into()),
        }
        bundle.timings.push(LayerTiming {
            layer: "semantic",
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        tracing::debug!(
            %user_id,
            injected = bundle.semantic.len(),
            skipped = ?bundle.skipped,
            "context gather complete"
        );
        bundle
    }

    async fn fetch_history(&self, user_id: &str, fallback: &[String]) -> Vec<String> {
        let raw = match self.fast.get(&history_key(user_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return fallback.to_vec(),
            Err(error) => {
                tracing::warn!(%user_id, %error, "history fetch failed; using caller messages");
                return fallback.to_vec();
            }
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(messages) if !messages.is_empty() => messages,
            Ok(_) => fallback.to_vec(),
            Err(error) => {
                tracing::warn!(%user_id, %error, "malformed session history; using caller messages");
                fallback.to_vec()
            }
        }
    }

    async fn fetch_graph_facts(&self, user_id: &str, skipped: &mut Vec<String>) -> String {
        let cache_key = graph_cache_key(user_id);
        if let Ok(Some(cached)) = self.fast.get(&cache_key).await {
            return cached;
        }

        let budget = Duration::from_millis(self.retrieval.graph_budget_ms);
        let facts = match tokio::time::timeout(budget, self.graph.facts_for_user(user_id)).await {
            Ok(Ok(facts)) => facts,
            Ok(Err(error)) => {
                tracing::warn!(%user_id, %error, store = self.graph.name(), "graph query failed");
                skipped.push(self.graph.name().to_string());
                return String::new();
            }
            Err(_) => {
                tracing::warn!(%user_id, store = self.graph.name(), "graph query over budget");
                skipped.push(self.graph.name().to_string());
                return String::new();
            }
        };

        let formatted = facts
            .iter()
            .map(|f| format!("{} {}", f.relation, f.target_name))
            .collect::<Vec<_>>()
            .join("\n");
        let ttl = Duration::from_secs(self.retrieval.graph_cache_ttl_secs);
        if let Err(error) = self.fast.set(&cache_key, &formatted, Some(ttl)).await {
            tracing::warn!(%user_id, %error, "graph fact cache write failed");
        }
        formatted
    }

    async fn fetch_semantic(
        &self,
        conn: &Connection,
        user_id: &str,
        query_text: &str,
        query_embedding: &[f32],
        bundle: &mut ContextBundle,
    ) {
        let filter = serde_json::json!({ "user_id": user_id });
        let budget = Duration::from_millis(self.retrieval.semantic_budget_ms);
        let matches = match tokio::time::timeout(
            budget,
            self.vector
                .query(query_embedding, self.retrieval.top_k, Some(filter)),
        )
        .await
        {
            Ok(Ok(matches)) => matches,
            Ok(Err(error)) => {
                tracing::warn!(%user_id, %error, store = self.vector.name(), "vector query failed");
                bundle.skipped.push(self.vector.name().to_string());
                return;
            }
            Err(_) => {
                tracing::warn!(%user_id, store = self.vector.name(), "vector query over budget");
                bundle.skipped.push(self.vector.name().to_string());
                return;
            }
        };

        let candidates: Vec<RecallCandidate> = matches
            .into_iter()
            .map(|m| RecallCandidate {
                memory_id: m.id,
                similarity: m.score,
            })
            .collect();
        match gate_candidates(conn, &self.gating, user_id, query_text, &candidates) {
            Ok(mut outcome) => {
                outcome
                    .injected
                    .sort_by(|a, b| b.composite.total_cmp(&a.composite));
                bundle.semantic = outcome.injected;
                bundle.recall_event_id = Some(outcome.event_id);
            }
            Err(error) => {
                tracing::warn!(%user_id, %error, "recall gating failed; semantic layer dropped");
                bundle.skipped.push("recall-gate".into());
            }
        }
    }

    async fn fetch_user_facts(&self, user_id: &str, query_embedding: &[f32]) -> Vec<String> {
        let filter = serde_json::json!({ "user_id": user_id, "type": "fact" });
        match self
            .vector
            .query(query_embedding, self.retrieval.top_k, Some(filter))
            .await
        {
            Ok(matches) => matches
                .into_iter()
                .filter_map(|m| {
                    m.metadata
                        .get("snippet")
                        .and_then(|s| s.as_str())
                        .map(str::to_string)
                })
                .collect(),
            Err(error) => {
                tracing::warn!(%user_id, %error, "user fact query failed; snippets dropped");
                Vec::new()
            }
        }
    }
}

/// Drop oldest messages until the total character count fits the budget.
/// Counted in chars, not bytes, so multi-byte text is budgeted fairly.
/// A single over-budget message survives alone rather than emptying history.
fn trim_history(history: &mut Vec<String>, char_budget: usize) {
    let mut total: usize = history.iter().map(|m| m.chars().count()).sum();
    while total > char_budget && history.len() > 1 {
        let dropped = history.remove(0);
        total -= dropped.chars().count();
    }
}

pub fn history_key(user_id: &str) -> String {
    format!("history:{user_id}")
}

pub fn profile_key(user_id: &str) -> String {
    format!("profile:{user_id}")
}

fn graph_cache_key(user_id: &str) -> String {
    format!("graph:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_drops_oldest_first() {
        let mut history = vec!["aaaa".to_string(), "bbbb".to_string(), "cccc".to_string()];
        trim_history(&mut history, 8);
        assert_eq!(history, vec!["bbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn trim_keeps_everything_under_budget() {
        let mut history = vec!["ab".to_string(), "cd".to_string()];
        trim_history(&mut history, 100);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn trim_budget_counts_chars_not_bytes() {
        // Each message is 4 chars but 8 bytes; a 8-char budget keeps both
        let mut history = vec!["çãéú".to_string(), "ñöüß".to_string()];
        trim_history(&mut history, 8);
        assert_eq!(history.len(), 2);

        trim_history(&mut history, 4);
        assert_eq!(history, vec!["ñöüß".to_string()]);
    }

    #[test]
    fn trim_never_empties_history() {
        let mut history = vec!["x".repeat(500)];
        trim_history(&mut history, 10);
        assert_eq!(history.len(), 1);
    }
}
