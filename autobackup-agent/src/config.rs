//! Configuration management for the mirror agent.
//!
//! Loads configuration from a TOML file. Every field has a default, so a
//! partial file (or no file at all) is a valid configuration.

use crate::utils::errors::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory basenames never descended into while enumerating the tree.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".vscode",
    "__pycache__",
    ".idea",
    "venv",
    "env",
    "node_modules",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Root of the live tree that gets mirrored and repaired
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Application name; the backup root is `<volume>/<app_name>_Backups`
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Where the `{"enabled": bool}` lifecycle file lives
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory basenames pruned from the walk
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsConfig {
    /// Candidate volume roots. Empty means "ask the mount table".
    #[serde(default)]
    pub volumes: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Upper cap on the copy worker pool (the pool is `min(2 * cores, cap)`)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Tick cadence of every reconciliation daemon, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of shards/daemons (0 = one per available core)
    #[serde(default)]
    pub daemons: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_app_name() -> String {
    "Mirror".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("auto_backup.json")
}

fn default_exclude_dirs() -> Vec<String> {
    DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect()
}

fn default_max_workers() -> usize {
    32
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            app_name: default_app_name(),
            state_file: default_state_file(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            daemons: 0,
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

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MirrorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mirror.app_name.trim().is_empty() {
            return Err(MirrorError::Config("mirror.app_name must not be empty".into()));
        }
        if self.reconcile.poll_interval_ms == 0 {
            return Err(MirrorError::Config(
                "reconcile.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl ReconcileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Number of daemons to spawn, resolving 0 to the core count.
    pub fn daemon_count(&self) -> usize {
        if self.daemons > 0 {
            self.daemons
        } else {
            available_cores()
        }
    }
}

impl BackupConfig {
    /// Worker pool size: `min(2 * cores, max_workers)`, never below one.
    pub fn worker_count(&self) -> usize {
        (available_cores() * 2).min(self.max_workers).max(1)
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mirror.app_name, "Mirror");
        assert_eq!(config.reconcile.poll_interval(), Duration::from_secs(5));
        assert!(config.mirror.exclude_dirs.contains(&".git".to_string()));
        assert!(config.targets.volumes.is_empty());
    }

    #[test]
    fn test_worker_count_is_capped() {
        let backup = BackupConfig { max_workers: 1 };
        assert_eq!(backup.worker_count(), 1);

        let backup = BackupConfig { max_workers: 0 };
        assert_eq!(backup.worker_count(), 1);

        let backup = BackupConfig::default();
        assert!(backup.worker_count() <= 32);
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "[mirror]\napp_name = \"Wn\"\n\n[reconcile]\npoll_interval_ms = 250\ndaemons = 3"
        )?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.mirror.app_name, "Wn");
        assert_eq!(config.mirror.source_root, PathBuf::from("."));
        assert_eq!(config.reconcile.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.reconcile.daemon_count(), 3);
        assert_eq!(config.backup.max_workers, 32);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_interval() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[reconcile]\npoll_interval_ms = 0")?;

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
        Ok(())
    }
}
