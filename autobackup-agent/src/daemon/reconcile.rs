//! Reconciliation daemon: keeps the live tree in line with the backup copy.
//!
//! Each daemon owns one [`Shard`] of the manifest. Every tick it walks its
//! entries and, per entry:
//!
//! 1. skips the entry if the backup copy is missing,
//! 2. restores the live file if it is missing,
//! 3. otherwise fingerprints the live file and restores it on mismatch.
//!
//! A restore only happens if the backup copy still matches the manifest.
//!
//! Failures are per entry and retried on the next tick; nothing here ends
//! the daemon except its cancellation token.

use crate::executor::manifest::{ManifestEntry, Shard};
use crate::fs::fingerprint::{fingerprint_file, ContentFingerprint};
use crate::utils::errors::{MirrorError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a live file had to be rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    Missing,
    Mismatched,
}

/// Result of reconciling a single entry for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Live file matches the manifest; nothing written
    Verified,
    /// Live file rewritten from the backup copy
    Restored(Drift),
    /// Backup copy missing or tampered with; entry left alone this tick
    Skipped,
    /// I/O error; retried next tick
    Failed,
}

/// Per-tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub verified: usize,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Verified => self.verified += 1,
            Outcome::Restored(_) => self.restored += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

pub struct ReconcileDaemon {
    id: usize,
    shard: Shard,
    backup_root: PathBuf,
    live_root: PathBuf,
    poll_interval: Duration,
    cancel_token: CancellationToken,
}

impl ReconcileDaemon {
    pub fn new(
        id: usize,
        shard: Shard,
        backup_root: PathBuf,
        live_root: PathBuf,
        poll_interval: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            shard,
            backup_root,
            live_root,
            poll_interval,
            cancel_token,
        }
    }

    /// Tick until cancelled. Cancellation is honoured between entries and
    /// during the sleep, so shutdown never waits longer than one entry or
    /// one interval.
    pub async fn run(self) {
        info!(
            "Reconcile daemon {} started ({} files, every {:?})",
            self.id,
            self.shard.entries.len(),
            self.poll_interval
        );

        loop {
            let report = self.reconcile_once().await;
            if report.restored > 0 || report.failed > 0 || report.skipped > 0 {
                info!(
                    "Daemon {} tick: {} verified, {} restored, {} skipped, {} failed",
                    self.id, report.verified, report.restored, report.skipped, report.failed
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel_token.cancelled() => break,
            }
        }

        info!("Reconcile daemon {} stopped", self.id);
    }

    /// One pass over the shard
    pub async fn reconcile_once(&self) -> TickReport {
        let mut report = TickReport::default();

        for entry in &self.shard.entries {
            if self.cancel_token.is_cancelled() {
                break;
            }
            report.record(self.reconcile_entry(entry).await);
        }

        report
    }

    async fn reconcile_entry(&self, entry: &ManifestEntry) -> Outcome {
        let live_path = match live_path_for(&entry.backup_path, &self.backup_root, &self.live_root) {
            Some(p) => p,
            None => {
                warn!(
                    "Manifest entry {} is outside backup root {}, skipping",
                    entry.backup_path.display(),
                    self.backup_root.display()
                );
                return Outcome::Skipped;
            }
        };

        match tokio::fs::try_exists(&entry.backup_path).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("{}, skipping", MirrorError::BackupCopyMissing(entry.backup_path.clone()));
                return Outcome::Skipped;
            }
            Err(e) => {
                warn!("Cannot check backup copy {}: {}", entry.backup_path.display(), e);
                return Outcome::Failed;
            }
        }

        let drift = match tokio::fs::try_exists(&live_path).await {
            Ok(false) => Drift::Missing,
            Ok(true) => match fingerprint_file(&live_path).await {
                Ok(fp) if fp == entry.fingerprint => {
                    debug!("Verified {}", live_path.display());
                    return Outcome::Verified;
                }
                Ok(_) => Drift::Mismatched,
                Err(e) => {
                    warn!("{}", MirrorError::Restore { path: live_path.clone(), source: e });
                    return Outcome::Failed;
                }
            },
            Err(e) => {
                warn!("{}", MirrorError::Restore { path: live_path.clone(), source: e });
                return Outcome::Failed;
            }
        };

        match drift {
            Drift::Missing => info!("Restoring missing file: {}", live_path.display()),
            Drift::Mismatched => info!("Fingerprint mismatch for {}, restoring", live_path.display()),
        }

        match restore_file(&entry.backup_path, &live_path, &entry.fingerprint).await {
            Ok(()) => {
                info!("Restored: {}", live_path.display());
                Outcome::Restored(drift)
            }
            Err(e @ (MirrorError::BackupCopyMissing(_) | MirrorError::BackupCopyTampered { .. })) => {
                warn!("{}, skipping", e);
                Outcome::Skipped
            }
            Err(e) => {
                warn!("{}", e);
                Outcome::Failed
            }
        }
    }
}

/// Re-root a backup path under the live tree.
pub fn live_path_for(backup_path: &Path, backup_root: &Path, live_root: &Path) -> Option<PathBuf> {
    let relative = backup_path.strip_prefix(backup_root).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(live_root.join(relative))
}

/// Overwrite `live_path` with the backup copy, after checking that the copy
/// still carries the expected fingerprint.
async fn restore_file(backup_path: &Path, live_path: &Path, expected: &ContentFingerprint) -> Result<()> {
    let restore_error = |source: io::Error| MirrorError::Restore {
        path: live_path.to_path_buf(),
        source,
    };

    let actual = match fingerprint_file(backup_path).await {
        Ok(fp) => fp,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MirrorError::BackupCopyMissing(backup_path.to_path_buf()));
        }
        Err(e) => return Err(restore_error(e)),
    };
    if actual != *expected {
        return Err(MirrorError::BackupCopyTampered {
            path: backup_path.to_path_buf(),
            expected: *expected,
            actual,
        });
    }

    if let Some(parent) = live_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(restore_error)?;
    }
    tokio::fs::copy(backup_path, live_path).await.map_err(restore_error)?;

    Ok(())
}
