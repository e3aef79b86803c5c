//! Application configuration.
//!
//! Loaded from a TOML file (`procaudit.toml` by default, overridable with
//! `PROCAUDIT_CONFIG`); every section falls back to serde defaults so an
//! empty file is valid. Secrets come from the environment, never the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::ai::GeminiConfig;
use crate::feed::FeedConfig;
use crate::pricing::PricingConfig;
use crate::queue::memory::MemoryQueueConfig;
use crate::ranking::RankingConfig;
use crate::selection::SelectionLimits;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub feed: FeedConfig,
    pub ai: GeminiConfig,
    pub pricing: PricingConfig,
    pub ranking: RankingConfig,
    pub selection: SelectionLimits,
    pub retry: RetryConfig,
    pub budget: BudgetConfig,
    pub queue: MemoryQueueConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("procaudit.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_blobs_dir")]
    pub blobs_dir: PathBuf,
}

fn default_blobs_dir() -> PathBuf {
    PathBuf::from("blobs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { blobs_dir: default_blobs_dir() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    /// Backoff doubles per attempt starting from this many hours.
    #[serde(default = "default_initial_backoff_hours")]
    pub initial_backoff_hours: i64,
    /// In-progress records untouched for this long are reclaimed.
    #[serde(default = "default_stuck_after_hours")]
    pub stuck_after_hours: i64,
}

fn default_max_retries() -> i64 {
    3
}
fn default_initial_backoff_hours() -> i64 {
    1
}
fn default_stuck_after_hours() -> i64 {
    6
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_hours: default_initial_backoff_hours(),
            stuck_after_hours: default_stuck_after_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Spending ceiling for one ranked run.
    #[serde(default = "default_run_budget")]
    pub run_budget: f64,
    /// Share of the run budget reserved for procurements nobody voted on.
    #[serde(default = "default_zero_vote_share")]
    pub zero_vote_share: f64,
}

fn default_run_budget() -> f64 {
    100.0
}
fn default_zero_vote_share() -> f64 {
    0.3
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            run_budget: default_run_budget(),
            zero_vote_share: default_zero_vote_share(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Processing longer than this starts the lease keep-alive task.
    #[serde(default = "default_lease_safety_secs")]
    pub lease_safety_secs: u64,
    /// Each extension pushes the lease this far out.
    #[serde(default = "default_lease_extension_secs")]
    pub lease_extension_secs: u64,
    /// Hard cap on total lease extension per message.
    #[serde(default = "default_lease_extension_cap_secs")]
    pub lease_extension_cap_secs: u64,
}

fn default_topic() -> String {
    "analyses".to_string()
}
fn default_max_concurrency() -> usize {
    4
}
fn default_lease_safety_secs() -> u64 {
    30
}
fn default_lease_extension_secs() -> u64 {
    60
}
fn default_lease_extension_cap_secs() -> u64 {
    1800
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            max_concurrency: default_max_concurrency(),
            lease_safety_secs: default_lease_safety_secs(),
            lease_extension_secs: default_lease_extension_secs(),
            lease_extension_cap_secs: default_lease_extension_cap_secs(),
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when no file exists.
    /// The Gemini API key always comes from `GEMINI_API_KEY`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("PROCAUDIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("procaudit.toml"));
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.ai.api_key = key;
            }
        }
        if let Ok(db) = std::env::var("PROCAUDIT_DB") {
            if !db.is_empty() {
                self.database.path = PathBuf::from(db);
            }
        }
    }
}
