//! Configuration management for the backup runner.
//!
//! Loads configuration from a TOML file; every knob the transfer and
//! monitoring core depends on lives here and is never mutated after load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ssh: SshConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host name or address
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Remote user
    pub user: String,

    /// Identity key path (tilde-expanded)
    pub key: PathBuf,

    /// Timeout for a single remote command invocation
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// ssh binary to invoke (overridable in tests)
    #[serde(default = "default_ssh_bin")]
    pub ssh_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root directory on the remote host to back up
    pub remote_root: String,

    /// Local destination root
    pub local_root: PathBuf,

    /// Directory for file lists and chunk files
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Directory for per-chunk transfer logs and run summaries
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of parallel workers (one chunk per worker)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// rsync --bwlimit value in KiB/s (0 = unlimited)
    #[serde(default)]
    pub bwlimit: u64,

    /// Pass-through rsync behavioral flags
    #[serde(default = "default_rsync_opts")]
    pub rsync_opts: Vec<String>,

    /// Per-attempt process timeout for one rsync invocation
    #[serde(default = "default_rsync_timeout")]
    pub rsync_timeout_secs: u64,

    /// rsync --timeout (I/O inactivity)
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// rsync --contimeout (connection establishment)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Extra attempts per chunk invocation after the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts on the same chunk
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Orchestrator-level retry rounds over still-failing chunks
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,

    /// Cooldown between retry rounds while failures remain
    #[serde(default = "default_round_cooldown")]
    pub round_cooldown_secs: u64,

    /// rsync binary to invoke (overridable in tests)
    #[serde(default = "default_rsync_bin")]
    pub rsync_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Whether to run the remote bandwidth monitor during transfers
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,

    /// Sleep between monitor cycles (actual cadence adds the sampler's
    /// internal 1s gap on top)
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_ssh_port() -> u16 {
    22
}

fn default_command_timeout() -> u64 {
    30
}

fn default_ssh_bin() -> String {
    "ssh".to_string()
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_threads() -> usize {
    4
}

fn default_rsync_opts() -> Vec<String> {
    vec!["--archive".to_string(), "--compress".to_string()]
}

fn default_rsync_timeout() -> u64 {
    3600
}

fn default_io_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

fn default_retry_rounds() -> u32 {
    3
}

fn default_round_cooldown() -> u64 {
    30
}

fn default_rsync_bin() -> String {
    "rsync".to_string()
}

fn default_monitor_enabled() -> bool {
    true
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            bwlimit: 0,
            rsync_opts: default_rsync_opts(),
            rsync_timeout_secs: default_rsync_timeout(),
            io_timeout_secs: default_io_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            retry_rounds: default_retry_rounds(),
            round_cooldown_secs: default_round_cooldown(),
            rsync_bin: default_rsync_bin(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            interval_secs: default_monitor_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Expand a leading `~` or `~/` in a path to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Identity key path with `~` expanded.
    pub fn identity_key(&self) -> PathBuf {
        expand_tilde(&self.ssh.key)
    }

    /// Validate configuration values before the core runs.
    pub fn validate(&self) -> Result<()> {
        if self.ssh.host.trim().is_empty() {
            return Err(BackupError::Config("ssh.host must not be empty".into()));
        }
        if self.ssh.user.trim().is_empty() {
            return Err(BackupError::Config("ssh.user must not be empty".into()));
        }
        if self.paths.remote_root.trim().is_empty() {
            return Err(BackupError::Config(
                "paths.remote_root must not be empty".into(),
            ));
        }
        if self.transfer.threads == 0 {
            return Err(BackupError::Config(
                "transfer.threads must be at least 1".into(),
            ));
        }
        let key = self.identity_key();
        if !key.exists() {
            return Err(BackupError::Config(format!(
                "ssh key not found: {}",
                key.display()
            )));
        }
        Ok(())
    }
}
