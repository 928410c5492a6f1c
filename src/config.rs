// src/config.rs
//! Pipeline configuration. Loaded from a TOML file (path overridable via
//! `INGEST_CONFIG_PATH`), with defaults for every knob so an empty file is a
//! valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::queue::QueueConfig;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How often the scheduler scans for due sources.
    pub schedule_interval_secs: u64,
    /// Per-job delay increment within one scheduling pass.
    pub stagger_secs: u64,
    /// Width of the idempotency time bucket.
    pub bucket_secs: i64,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub concurrency: usize,
    pub jobs_per_second: f64,
    pub job_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub completed_retention_hours: i64,
    pub failed_retention_hours: i64,
    pub max_completed: usize,
    pub max_failed: usize,
    pub cleanup_interval_secs: u64,
    pub listen_port: u16,
    /// Sources seeded into the in-memory registry at boot.
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub scrape_enabled: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_frequency")]
    pub fetch_frequency_minutes: i64,
}

fn default_active() -> bool {
    true
}

fn default_frequency() -> i64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schedule_interval_secs: 60,
            stagger_secs: 1,
            bucket_secs: 300,
            max_attempts: 3,
            backoff_base_secs: 30,
            concurrency: 4,
            jobs_per_second: 2.0,
            job_timeout_secs: 120,
            http_timeout_secs: 20,
            completed_retention_hours: 24,
            failed_retention_hours: 168,
            max_completed: 1_000,
            max_failed: 5_000,
            cleanup_interval_secs: 600,
            listen_port: 8080,
            sources: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        toml::from_str(&content).context("parsing pipeline config")
    }

    /// Load using `$INGEST_CONFIG_PATH`, then `config/pipeline.toml`, then
    /// built-in defaults when neither exists.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to a non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            concurrency: self.concurrency,
            jobs_per_second: self.jobs_per_second,
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            completed_retention: chrono::Duration::hours(self.completed_retention_hours),
            failed_retention: chrono::Duration::hours(self.failed_retention_hours),
            max_completed: self.max_completed,
            max_failed: self.max_failed,
            ..QueueConfig::default()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_secs(self.stagger_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.stagger_secs, 1);
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn sources_parse_with_partial_fields() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
max_attempts = 5

[[sources]]
name = "Example Wire"
url = "https://wire.example"
feed_url = "https://wire.example/rss"

[[sources]]
name = "Scrape Only"
url = "https://scrape.example/front"
scrape_enabled = true
fetch_frequency_minutes = 15
"#,
        )
        .unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.sources.len(), 2);
        assert!(cfg.sources[0].active);
        assert_eq!(cfg.sources[0].fetch_frequency_minutes, 60);
        assert!(cfg.sources[1].scrape_enabled);
        assert_eq!(cfg.sources[1].fetch_frequency_minutes, 15);
    }

    #[serial_test::serial]
    #[test]
    fn env_path_overrides_default_location() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("pipeline.toml");
        std::fs::write(&p, "concurrency = 9").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.concurrency, 9);
        env::remove_var(ENV_CONFIG_PATH);
    }
}
