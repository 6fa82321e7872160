//! Ratewatch configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RatewatchError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewatchConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl RatewatchConfig {
    /// Load config from the default path (~/.ratewatch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RatewatchError::Config(format!("Failed to read config: {e}")))?;
        tracing::debug!("Loading config from {}", path.display());
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RatewatchError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RatewatchError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Ratewatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ratewatch")
    }
}

/// Batch orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum execution units in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    /// Delay before the opportunistic second admission attempt.
    #[serde(default = "default_refill_delay")]
    pub refill_delay_ms: u64,
    /// Length cap of the persisted `recentHistory` list.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

fn default_concurrency() -> usize { 3 }
fn default_task_timeout() -> u64 { 60 }
fn default_handshake_timeout() -> u64 { 15 }
fn default_probe_interval() -> u64 { 500 }
fn default_refill_delay() -> u64 { 500 }
fn default_history_cap() -> usize { 50 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            task_timeout_secs: default_task_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            probe_interval_ms: default_probe_interval(),
            refill_delay_ms: default_refill_delay(),
            history_cap: default_history_cap(),
        }
    }
}

/// Precision alarm scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hour of day (local) for the daily future-date job.
    #[serde(default = "default_daily_hour")]
    pub daily_hour: u32,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Comma-separated hours-of-day the hourly job may run in.
    #[serde(default = "default_active_hours")]
    pub active_hours: String,
    #[serde(default = "default_future_days_min")]
    pub future_days_min: u32,
    #[serde(default = "default_future_days")]
    pub future_days: u32,
}

fn default_daily_hour() -> u32 { 5 }
fn default_keepalive() -> u64 { 30 }
fn default_future_days_min() -> u32 { 1 }
fn default_future_days() -> u32 { 7 }

/// 07:00 through 01:59.
pub fn default_active_hours() -> String {
    "07,08,09,10,11,12,13,14,15,16,17,18,19,20,21,22,23,00,01".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_hour: default_daily_hour(),
            keepalive_secs: default_keepalive(),
            active_hours: default_active_hours(),
            future_days_min: default_future_days_min(),
            future_days: default_future_days(),
        }
    }
}

/// Which state store backs persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Json,
}

/// State store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> StoreBackend { StoreBackend::Sqlite }
fn default_store_path() -> String { "~/.ratewatch/state.db".into() }

impl StoreConfig {
    /// Store path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

/// Local control surface for the UI and the browser-side agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 7878 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream backend that receives observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_base")]
    pub api_base_url: String,
    #[serde(default)]
    pub store_id: String,
    #[serde(default = "default_report_timeout")]
    pub report_timeout_secs: u64,
    /// Where to send the operator when every task of a run failed.
    #[serde(default = "default_login_url")]
    pub login_url: String,
}

fn default_api_base() -> String { "http://localhost:8787".into() }
fn default_report_timeout() -> u64 { 30 }
fn default_login_url() -> String { "https://passport.ctrip.com/user/login".into() }

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base(),
            store_id: String::new(),
            report_timeout_secs: default_report_timeout(),
            login_url: default_login_url(),
        }
    }
}
