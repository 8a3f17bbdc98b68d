//! Lifecycle control: the on/off switch for the whole mirror subsystem.
//!
//! `Lifecycle` owns everything a running mirror needs (selected target,
//! manifest, daemon handles) and persists the `{"enabled": bool}` flag so the
//! choice survives restarts.

use crate::config::Config;
use crate::daemon::DaemonSet;
use crate::executor::manifest::Manifest;
use crate::executor::{BackupExecutor, BackupReport};
use crate::fs::atomic::atomic_write;
use crate::fs::targets::{all_targets, select_target, BackupTarget};
use crate::fs::walker::WalkOptions;
use crate::utils::errors::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often a running backup pass logs its progress
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Persisted on/off flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub enabled: bool,
}

impl LifecycleState {
    /// A missing file means "never enabled".
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, &serde_json::to_vec(self)?)?;
        Ok(())
    }
}

/// What is running right now
struct ActiveMirror {
    target: BackupTarget,
    manifest: Manifest,
    daemons: DaemonSet,
}

/// Snapshot for `autobackup status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub enabled: bool,
    pub running: bool,
    pub backup_root: Option<PathBuf>,
    pub tracked_files: usize,
    pub daemons: usize,
}

pub struct Lifecycle {
    config: Config,
    shutdown: CancellationToken,
    active: Option<ActiveMirror>,
}

impl Lifecycle {
    pub fn new(config: Config) -> Self {
        Self::with_shutdown(config, CancellationToken::new())
    }

    /// `shutdown` cancels an in-flight backup pass and ends `supervise`.
    pub fn with_shutdown(config: Config, shutdown: CancellationToken) -> Self {
        Self {
            config,
            shutdown,
            active: None,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.config.mirror.state_file
    }

    /// Persisted flag
    pub fn is_enabled(&self) -> Result<bool> {
        Ok(LifecycleState::load(self.state_path())?.enabled)
    }

    /// Whether this process has daemons running
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.active.as_ref().map(|a| &a.manifest)
    }

    pub fn target(&self) -> Option<&BackupTarget> {
        self.active.as_ref().map(|a| &a.target)
    }

    /// Discover a target, run one backup pass and persist its manifest.
    pub async fn run_backup(&self) -> Result<(BackupTarget, BackupReport)> {
        let target = select_target(&self.config)?;
        let source_root = self.source_root()?;

        let executor = BackupExecutor::with_cancel(
            self.config.backup.worker_count(),
            self.shutdown.child_token(),
        );
        // The state file flips on every enable/disable and must not be restored
        let options = WalkOptions {
            exclude_dirs: self.config.mirror.exclude_dirs.clone(),
            skip_paths: self.resolved_state_path().into_iter().collect(),
        };

        let mut progress = executor.subscribe();
        let reporter = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_LOG_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("Backup in progress: {} files done", *progress.borrow_and_update());
            }
        });
        let result = executor.execute(&source_root, &target, options).await;
        reporter.abort();
        let report = result?;

        report.manifest.save(&target.manifest_path())?;
        Ok((target, report))
    }

    /// Back up the tree, then start reconciliation over the fresh manifest.
    ///
    /// Already-running daemons are stopped first. The enabled flag is only
    /// persisted once the daemons are up.
    pub async fn enable(&mut self) -> Result<BackupReport> {
        self.stop_daemons().await;

        let (target, report) = self.run_backup().await?;

        // Daemons start from what is on disk, not from memory
        let manifest = Manifest::load(&target.manifest_path())?;
        self.start_daemons(target, manifest)?;

        LifecycleState { enabled: true }.save(self.state_path())?;
        info!("Auto backup/restore enabled");
        Ok(report)
    }

    /// Stop every daemon and persist the disabled flag.
    pub async fn disable(&mut self) -> Result<()> {
        self.stop_daemons().await;
        LifecycleState { enabled: false }.save(self.state_path())?;
        info!("Auto backup/restore disabled");
        Ok(())
    }

    /// Pick up where a previous process left off.
    ///
    /// Returns `false` if the subsystem is disabled. Otherwise the first
    /// readable manifest on any discovered target is reused; with no manifest
    /// at all a fresh pass runs via [`Lifecycle::enable`].
    pub async fn resume(&mut self) -> Result<bool> {
        if !self.is_enabled()? {
            info!("Auto backup is disabled, nothing to resume");
            return Ok(false);
        }
        if self.is_running() {
            return Ok(true);
        }

        let mut load_error = None;
        for target in all_targets(&self.config) {
            let manifest_path = target.manifest_path();
            if !manifest_path.is_file() {
                continue;
            }

            match Manifest::load(&manifest_path) {
                Ok(manifest) => {
                    info!("Loaded backup manifest from: {}", manifest_path.display());
                    self.start_daemons(target, manifest)?;
                    return Ok(true);
                }
                Err(e) => {
                    warn!("{}", e);
                    load_error = Some(e);
                }
            }
        }

        if let Some(e) = load_error {
            return Err(e);
        }

        info!("No backup manifest found, running a fresh backup pass");
        self.enable().await?;
        Ok(true)
    }

    /// Keep daemons alive until shutdown or until the persisted flag is
    /// switched off (e.g. by `autobackup disable` from another process).
    pub async fn supervise(&mut self) -> Result<()> {
        let interval = self.config.reconcile.poll_interval();
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping reconcile daemons");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    match self.is_enabled() {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("Auto backup was disabled, stopping reconcile daemons");
                            break;
                        }
                        Err(e) => warn!("Cannot read lifecycle state: {}", e),
                    }
                }
            }
        }

        self.stop_daemons().await;
        Ok(())
    }

    pub fn status(&self) -> Result<Status> {
        let enabled = self.is_enabled()?;

        if let Some(active) = &self.active {
            return Ok(Status {
                enabled,
                running: true,
                backup_root: Some(active.target.backup_root.clone()),
                tracked_files: active.manifest.len(),
                daemons: active.daemons.len(),
            });
        }

        let persisted = all_targets(&self.config).into_iter().find_map(|t| {
            let manifest = Manifest::load(&t.manifest_path()).ok()?;
            Some((t.backup_root, manifest.len()))
        });

        Ok(Status {
            enabled,
            running: false,
            backup_root: persisted.as_ref().map(|(root, _)| root.clone()),
            tracked_files: persisted.map(|(_, n)| n).unwrap_or(0),
            daemons: 0,
        })
    }

    fn start_daemons(&mut self, target: BackupTarget, manifest: Manifest) -> Result<()> {
        let live_root = self.source_root()?;
        let daemons = DaemonSet::spawn(
            &manifest,
            &target.backup_root,
            &live_root,
            self.config.reconcile.daemon_count(),
            self.config.reconcile.poll_interval(),
        );

        self.active = Some(ActiveMirror {
            target,
            manifest,
            daemons,
        });
        Ok(())
    }

    /// Stop daemons without touching the persisted flag.
    pub async fn stop_daemons(&mut self) {
        if let Some(active) = self.active.take() {
            let grace = self.config.reconcile.poll_interval() + Duration::from_secs(1);
            active.daemons.stop(grace).await;
        }
    }

    /// Absolute state file path as the walker would spell it. The file
    /// itself may not exist yet.
    fn resolved_state_path(&self) -> Option<PathBuf> {
        let path = self.state_path();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        Some(parent.canonicalize().ok()?.join(path.file_name()?))
    }

    fn source_root(&self) -> Result<PathBuf> {
        let root = &self.config.mirror.source_root;
        root.canonicalize().map_err(|e| {
            MirrorError::Config(format!("source root {}: {}", root.display(), e))
        })
    }
}
