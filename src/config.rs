use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub data_dir: String,
    pub index_path: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_every_hour")]
    pub checkpoint_every: usize,
    #[serde(default = "default_every_hour")]
    pub refresh_every: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_overfetch_multiple")]
    pub overfetch_multiple: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default)]
    pub activity_filter: ActivityFilter,
}

/// Which positions make a candidate count as active during selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityFilter {
    #[default]
    AnyAsset,
    TrackedAssets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_tracked")]
    pub tracked: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfrastructureConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_log_path")]
    pub csv_log_path: String,
    #[serde(default)]
    pub prometheus_enabled: bool,
}

fn default_duration_hours() -> u64 { 24 }
fn default_interval_secs() -> u64 { 300 }
fn default_every_hour() -> usize { 12 }
fn default_target_count() -> usize { 100 }
fn default_overfetch_multiple() -> usize { 3 }
fn default_max_candidates() -> usize { 500 }
fn default_tracked() -> Vec<String> { vec!["BTC".to_string(), "ETH".to_string()] }
fn default_request_timeout() -> u64 { 10 }
fn default_max_retries() -> u32 { 2 }
fn default_retry_backoff() -> u64 { 500 }
fn default_csv_log_path() -> String { "data/ticks.csv".to_string() }

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            duration_hours: default_duration_hours(),
            interval_secs: default_interval_secs(),
            checkpoint_every: default_every_hour(),
            refresh_every: default_every_hour(),
        }
    }
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            overfetch_multiple: default_overfetch_multiple(),
            max_candidates: default_max_candidates(),
            activity_filter: ActivityFilter::default(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { tracked: default_tracked() }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Number of ticks in a run: duration ÷ interval.
    pub fn total_ticks(&self) -> usize {
        if self.interval_secs == 0 {
            return 0;
        }
        (self.duration_hours * 3600 / self.interval_secs) as usize
    }
}

impl RosterConfig {
    /// Candidates requested from the leaderboard: target × multiple, capped.
    pub fn candidate_limit(&self) -> usize {
        self.target_count
            .saturating_mul(self.overfetch_multiple.max(1))
            .min(self.max_candidates)
    }
}

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub leaderboard_url: String,
    pub info_url: String,
    pub run_id: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        anyhow::ensure!(config.sampling.interval_secs > 0, "sampling.interval_secs must be > 0");
        anyhow::ensure!(config.sampling.checkpoint_every > 0, "sampling.checkpoint_every must be > 0");
        anyhow::ensure!(config.sampling.refresh_every > 0, "sampling.refresh_every must be > 0");
        anyhow::ensure!(!config.assets.tracked.is_empty(), "assets.tracked must not be empty");
        Ok(config)
    }

    /// Run identity: environment override, then config, then a fresh id.
    pub fn resolve_run_id(&self, env: &EnvConfig) -> String {
        env.run_id
            .clone()
            .or_else(|| self.system.run_id.clone())
            .unwrap_or_else(|| format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S")))
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            leaderboard_url: std::env::var("LEADERBOARD_URL")
                .unwrap_or_else(|_| "http://localhost:3000/leaderboard".to_string()),
            info_url: std::env::var("HYPERLIQUID_INFO_URL")
                .unwrap_or_else(|_| "https://api.hyperliquid.xyz/info".to_string()),
            run_id: std::env::var("RUN_ID").ok().filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [system]
        data_dir = "data"
        index_path = "data/checkpoints.db"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(config.sampling.interval_secs, 300);
        assert_eq!(config.sampling.total_ticks(), 288);
        assert_eq!(config.roster.target_count, 100);
        assert_eq!(config.roster.activity_filter, ActivityFilter::AnyAsset);
        assert_eq!(config.assets.tracked, vec!["BTC", "ETH"]);
        assert!(!config.monitoring.csv_logging);
    }

    #[test]
    fn test_candidate_limit_is_capped() {
        let mut roster = RosterConfig::default();
        assert_eq!(roster.candidate_limit(), 300);

        roster.target_count = 400;
        assert_eq!(roster.candidate_limit(), 500);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let toml = format!("{}\n[sampling]\ninterval_secs = 0\n", MINIMAL);
        assert!(Config::parse(&toml).is_err());
    }

    #[test]
    fn test_activity_filter_parses_snake_case() {
        let toml = format!("{}\n[roster]\nactivity_filter = \"tracked_assets\"\n", MINIMAL);
        let config = Config::parse(&toml).unwrap();
        assert_eq!(config.roster.activity_filter, ActivityFilter::TrackedAssets);
    }

    #[test]
    fn test_env_run_id_wins() {
        let config = Config::parse(MINIMAL).unwrap();
        let env = EnvConfig {
            leaderboard_url: String::new(),
            info_url: String::new(),
            run_id: Some("run_a".to_string()),
        };
        assert_eq!(config.resolve_run_id(&env), "run_a");

        let env = EnvConfig { run_id: None, ..env };
        assert!(config.resolve_run_id(&env).starts_with("run_"));
    }
}
