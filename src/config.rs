use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngramConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub salience: SalienceConfig,
    pub lifecycle: LifecycleConfig,
    pub gating: GatingConfig,
    pub distill: DistillConfig,
    pub retrieval: RetrievalConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Bounds of the salience band. Scores live in `[base, base + span]`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SalienceConfig {
    pub base: f64,
    pub span: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleConfig {
    pub aging_after_days: u64,
    pub aging_salience_floor: f64,
    pub archive_after_days: u64,
    pub archive_salience_ceiling: f64,
    pub undo_window_days: u64,
    pub max_batch: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatingConfig {
    pub enabled: bool,
    pub min_salience: f64,
    pub min_trust: f64,
    pub min_composite: f64,
    pub near_miss_margin: f64,
    pub correction_trust_penalty: f64,
    pub correction_salience_penalty: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DistillConfig {
    pub group_size: usize,
    pub max_salience: f64,
    pub min_age_days: u64,
    pub summary_char_limit: usize,
    /// Group cap per run; zero or negative disables the scan entirely.
    pub global_cap: i64,
    pub per_user_cap: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub semantic_budget_ms: u64,
    pub graph_budget_ms: u64,
    pub graph_cache_ttl_secs: u64,
    pub history_char_budget: usize,
    pub top_k: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub salience_interval_secs: u64,
    pub lifecycle_interval_secs: u64,
    pub distill_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_engram_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            base: 0.8,
            span: 0.45,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            aging_after_days: 30,
            aging_salience_floor: 0.9,
            archive_after_days: 60,
            archive_salience_ceiling: 0.95,
            undo_window_days: 30,
            max_batch: 500,
        }
    }
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_salience: 0.85,
            min_trust: 0.55,
            min_composite: 0.35,
            near_miss_margin: 0.05,
            correction_trust_penalty: 0.1,
            correction_salience_penalty: 0.05,
        }
    }
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            group_size: 8,
            max_salience: 0.9,
            min_age_days: 30,
            summary_char_limit: 1500,
            global_cap: 20,
            per_user_cap: 2,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_budget_ms: 140,
            graph_budget_ms: 160,
            graph_cache_ttl_secs: 60,
            history_char_budget: 4000,
            top_k: 5,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            salience_interval_secs: 300,
            lifecycle_interval_secs: 3600,
            distill_interval_secs: 21_600,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DB, ENGRAM_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ENGRAM_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ENGRAM_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngramConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert!(config.storage.db_path.ends_with("memory.db"));
        assert!((config.salience.base - 0.8).abs() < 1e-9);
        assert!((config.salience.base + config.salience.span - 1.25).abs() < 1e-9);
        assert!(config.gating.enabled);
        assert_eq!(config.lifecycle.undo_window_days, 30);
        assert_eq!(config.retrieval.top_k, 5);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[gating]
min_salience = 0.9

[distill]
global_cap = 0
"#;
        let config: EngramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert!((config.gating.min_salience - 0.9).abs() < 1e-9);
        assert_eq!(config.distill.global_cap, 0);
        // defaults still apply for unset fields
        assert!((config.gating.min_trust - 0.55).abs() < 1e-9);
        assert_eq!(config.distill.group_size, 8);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngramConfig::default();
        std::env::set_var("ENGRAM_DB", "/tmp/override.db");
        std::env::set_var("ENGRAM_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");

        // Clean up
        std::env::remove_var("ENGRAM_DB");
        std::env::remove_var("ENGRAM_LOG_LEVEL");
    }
}
