//! In-process TTL key-value store.
//!
//! Backs the [`FastStore`] contract for local/dev deployments and tests.
//! Expiry is lazy: entries past their deadline are dropped on the next
//! access or scan, which is enough for short-TTL caches and counters.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::FastStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Mutex-guarded hash map with per-entry TTL.
#[derive(Default)]
pub struct LocalFastStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LocalFastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FastStore for LocalFastStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match entry.value.parse::<i64>() {
                Ok(n) => n,
                Err(_) => bail!("incr on non-numeric key: {key}"),
            },
            _ => 0,
        };

        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));

        let mut matches: Vec<(String, String)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }
}
