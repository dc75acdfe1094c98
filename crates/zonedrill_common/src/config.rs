//! Zonedrill configuration
//!
//! Configuration lives in /etc/zonedrill/config.toml unless `$ZONEDRILL_CONFIG`
//! or an explicit path says otherwise. A missing file means defaults; a file
//! that exists but does not parse is an error.

use crate::error::{DrillError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/zonedrill";
const CONFIG_FILE: &str = "config.toml";

/// Environment override for the config path
pub const CONFIG_ENV: &str = "ZONEDRILL_CONFIG";

/// Default snapshot directory
pub const DEFAULT_SNAPSHOT_DIR: &str = "/var/lib/zonedrill/snapshots";

/// Scheduler gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8600".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_api_timeout(),
            token: None,
        }
    }
}

/// Convergence poll pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    /// First wait between ticks (seconds, valid: 1-300)
    #[serde(default = "default_base_interval")]
    pub base_interval_secs: u64,

    /// Longest wait between ticks (seconds, valid: base-900)
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    /// Growth factor per tick (valid: 1.0-4.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Jitter as a fraction of the wait (valid: 0.0-0.5)
    #[serde(default = "default_jitter")]
    pub jitter_percent: f64,

    /// Give up waiting after this long (seconds, valid: 10-86400)
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    /// Optional hard cap on the number of ticks
    #[serde(default)]
    pub max_ticks: Option<u32>,
}

fn default_base_interval() -> u64 {
    15
}

fn default_max_interval() -> u64 {
    60
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_jitter() -> f64 {
    0.2
}

fn default_deadline() -> u64 {
    1800 // 30 minutes
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval(),
            max_interval_secs: default_max_interval(),
            backoff_factor: default_backoff_factor(),
            jitter_percent: default_jitter(),
            deadline_secs: default_deadline(),
            max_ticks: None,
        }
    }
}

impl PollSettings {
    pub fn effective_base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs.clamp(1, 300))
    }

    pub fn effective_max_interval(&self) -> Duration {
        let base = self.base_interval_secs.clamp(1, 300);
        Duration::from_secs(self.max_interval_secs.clamp(base, 900))
    }

    pub fn effective_backoff_factor(&self) -> f64 {
        self.backoff_factor.clamp(1.0, 4.0)
    }

    pub fn effective_jitter(&self) -> f64 {
        self.jitter_percent.clamp(0.0, 0.5)
    }

    pub fn effective_deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs.clamp(10, 86_400))
    }

    /// Check if any value was clamped
    pub fn was_clamped(&self) -> bool {
        self.effective_base_interval().as_secs() != self.base_interval_secs
            || self.effective_max_interval().as_secs() != self.max_interval_secs
            || self.effective_backoff_factor() != self.backoff_factor
            || self.effective_jitter() != self.jitter_percent
            || self.effective_deadline().as_secs() != self.deadline_secs
    }
}

/// Snapshot storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_DIR)
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
        }
    }
}

/// Operator notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,

    /// POST target; when unset notifications only go to the log
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_notify_enabled() -> bool {
    true
}

fn default_subject_prefix() -> String {
    "[zonedrill]".to_string()
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
            webhook_url: None,
            subject_prefix: default_subject_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete zonedrill configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DrillConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub snapshots: SnapshotSettings,

    #[serde(default)]
    pub notify: NotifySettings,

    #[serde(default)]
    pub log: LogSettings,
}

impl DrillConfig {
    /// Load from `path`, else `$ZONEDRILL_CONFIG`, else the system path
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(config_path),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| DrillError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
            .map_err(|e| DrillError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
}
