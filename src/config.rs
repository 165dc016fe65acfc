use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str = "https://api.hackerone.com/v1";
const TOKEN_FILE: &str = ".hackerone_token";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry_url: String,
    pub registry_token: String,
    /// Delay between listing pages.
    pub registry_page_delay_ms: u64,
    /// SQLite file path, or `:memory:` for a non-persistent store.
    pub database_path: String,
    pub bind: String,

    pub probe_timeout_secs: u64,
    pub probe_workers: usize,

    pub program_concurrency: usize,
    pub scan_deadline_secs: u64,
    pub scan_interval_secs: u64,

    pub expansion_concurrency: usize,
    pub expansion_timeout_secs: u64,
    pub expansion_batch_timeout_secs: u64,

    /// How long in-flight work may keep running after cancellation.
    pub grace_period_secs: u64,

    pub enrichment_timeout_secs: u64,
    pub enrichment_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            registry_token: String::new(),
            registry_page_delay_ms: 500,
            database_path: "./bounty_watch.db".to_string(),
            bind: "0.0.0.0:8080".to_string(),
            probe_timeout_secs: 10,
            probe_workers: 50,
            program_concurrency: 5,
            scan_deadline_secs: 2 * 60 * 60,
            scan_interval_secs: 24 * 60 * 60,
            expansion_concurrency: 3,
            expansion_timeout_secs: 30,
            expansion_batch_timeout_secs: 5 * 60,
            grace_period_secs: 10,
            enrichment_timeout_secs: 30,
            enrichment_concurrency: 10,
        }
    }
}

impl Config {
    /// Defaults, then the optional JSON file, then the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env();
        if cfg.registry_token.is_empty() {
            if let Ok(token) = std::fs::read_to_string(TOKEN_FILE) {
                cfg.registry_token = token;
            }
        }
        cfg.registry_token = cfg.registry_token.trim().to_string();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_str(&data)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("HACKERONE_TOKEN") {
            if !v.trim().is_empty() {
                self.registry_token = v;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            if !v.is_empty() {
                self.database_path = v;
            }
        }
        if let Ok(v) = std::env::var("WEB_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.bind = format!("0.0.0.0:{}", port);
            }
        }
        if let Some(v) = env_parse("HEALTH_CHECK_TIMEOUT") {
            self.probe_timeout_secs = v;
        }
        if let Some(v) = env_parse("HEALTH_CHECK_WORKERS") {
            self.probe_workers = v;
        }
        if let Some(v) = env_parse("SCAN_INTERVAL") {
            self.scan_interval_secs = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let caps = [
            self.probe_workers,
            self.program_concurrency,
            self.expansion_concurrency,
            self.enrichment_concurrency,
        ];
        if caps.contains(&0) {
            bail!("concurrency caps must be at least 1");
        }
        let timeouts = [
            self.probe_timeout_secs,
            self.expansion_timeout_secs,
            self.expansion_batch_timeout_secs,
            self.scan_deadline_secs,
        ];
        if timeouts.contains(&0) {
            bail!("timeouts must be at least 1 second");
        }
        if self.scan_interval_secs == 0 {
            bail!("scan interval must be at least 1 second");
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn scan_deadline(&self) -> Duration {
        Duration::from_secs(self.scan_deadline_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn expansion_timeout(&self) -> Duration {
        Duration::from_secs(self.expansion_timeout_secs)
    }

    pub fn expansion_batch_timeout(&self) -> Duration {
        Duration::from_secs(self.expansion_batch_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.registry_page_delay_ms)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
