//! Backup executor - mirrors the live tree into a backup root.
//!
//! This module ties together:
//! - Tree enumeration (streamed from a blocking walker task)
//! - A bounded pool of copy workers
//! - Manifest accumulation by a single coordinator

pub mod manifest;

use crate::fs::fingerprint::copy_with_fingerprint;
use crate::fs::targets::BackupTarget;
use crate::fs::walker::{enumerate, FileEntry, WalkOptions};
use crate::utils::errors::{MirrorError, Result};
use manifest::{Manifest, ManifestEntry};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backup execution result
#[derive(Debug)]
pub struct BackupReport {
    pub manifest: Manifest,
    pub succeeded: usize,
    pub failed: usize,
    /// Directories the walker could not read
    pub walk_errors: usize,
    pub total_bytes: u64,
    /// Most copy workers observed running at once
    pub peak_concurrency: usize,
    pub duration: Duration,
}

/// Outcome of a single file copy, returned to the coordinator
type CopyOutcome = Result<(ManifestEntry, u64)>;

/// Counts workers currently inside a copy
#[derive(Debug, Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(self: &Arc<Self>) -> GaugeSlot {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeSlot(Arc::clone(self))
    }
}

struct GaugeSlot(Arc<ConcurrencyGauge>);

impl Drop for GaugeSlot {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Main backup executor
pub struct BackupExecutor {
    workers: usize,
    cancel_token: CancellationToken,
    /// Files finished (copied or failed) in the current pass
    progress: watch::Sender<usize>,
}

impl BackupExecutor {
    /// Create a new backup executor (no cancellation support)
    pub fn new(workers: usize) -> Self {
        Self::with_cancel(workers, CancellationToken::new())
    }

    /// Create a new backup executor with cancellation support
    pub fn with_cancel(workers: usize, cancel_token: CancellationToken) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            workers: workers.max(1),
            cancel_token,
            progress,
        }
    }

    /// Watch the number of files finished so far
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.progress.subscribe()
    }

    /// Run one backup pass of `source_root` into `target`.
    ///
    /// Per-file failures are logged and counted, never fatal. The returned
    /// manifest only exists once every submitted copy has finished. A
    /// cancelled pass returns `MirrorError::Cancelled`.
    pub async fn execute(
        &self,
        source_root: &Path,
        target: &BackupTarget,
        mut options: WalkOptions,
    ) -> Result<BackupReport> {
        let start_time = Instant::now();
        target.ensure().await?;
        self.progress.send_replace(0);

        info!(
            "Starting backup pass: {} -> {} ({} workers)",
            source_root.display(),
            target.backup_root.display(),
            self.workers
        );

        // Never mirror the mirror
        options.skip_paths.push(target.backup_root.clone());
        let manifest_path = target.manifest_path();

        let (tx, mut rx) = mpsc::channel::<Result<FileEntry>>(self.workers * 4);
        let walk_root = source_root.to_path_buf();
        let walker = tokio::task::spawn_blocking(move || {
            for item in enumerate(&walk_root, options) {
                if tx.blocking_send(item).is_err() {
                    // Coordinator stopped listening (cancelled)
                    break;
                }
            }
        });

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let gauge = Arc::new(ConcurrencyGauge::default());
        let mut tasks: JoinSet<CopyOutcome> = JoinSet::new();
        let mut tally = Tally::default();
        let mut walk_errors = 0usize;
        let mut cancelled = false;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = rx.recv() => item,
            };
            let Some(item) = item else { break };

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable part of tree: {}", e);
                    walk_errors += 1;
                    continue;
                }
            };

            if target.backup_root.join(&entry.relative_path) == manifest_path {
                tally.reject(MirrorError::ReservedPath(entry.source_path));
                self.progress.send_replace(tally.processed());
                continue;
            }

            // Hold a permit for the whole copy; this is the pool bound
            let permit = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| MirrorError::Daemon(format!("Worker pool closed: {}", e)))?
                }
            };

            let backup_root = target.backup_root.clone();
            let gauge = Arc::clone(&gauge);
            tasks.spawn(async move {
                let _permit = permit;
                let _slot = gauge.enter();
                backup_file(&entry, &backup_root).await
            });

            while let Some(joined) = tasks.try_join_next() {
                tally.merge(joined);
                self.progress.send_replace(tally.processed());
            }
        }

        // Unblocks the walker if it is waiting on a full channel
        drop(rx);

        while let Some(joined) = tasks.join_next().await {
            tally.merge(joined);
            self.progress.send_replace(tally.processed());
        }

        if let Err(e) = walker.await {
            warn!("Tree walker task failed: {}", e);
        }

        if cancelled {
            info!(
                "Backup pass cancelled after {} files ({} failed)",
                tally.succeeded, tally.failed
            );
            return Err(MirrorError::Cancelled);
        }

        let duration = start_time.elapsed();
        info!(
            "Backup completed. Successful: {}, Failed: {}, {} bytes in {:.2}s",
            tally.succeeded,
            tally.failed,
            tally.total_bytes,
            duration.as_secs_f64()
        );

        Ok(BackupReport {
            manifest: tally.manifest,
            succeeded: tally.succeeded,
            failed: tally.failed,
            walk_errors,
            total_bytes: tally.total_bytes,
            peak_concurrency: gauge.peak.load(Ordering::SeqCst),
            duration,
        })
    }
}

/// Coordinator-side accumulation of worker results
#[derive(Default)]
struct Tally {
    manifest: Manifest,
    succeeded: usize,
    failed: usize,
    total_bytes: u64,
}

impl Tally {
    fn merge(&mut self, joined: std::result::Result<CopyOutcome, JoinError>) {
        match joined {
            Ok(Ok((entry, bytes))) => {
                self.manifest.insert(entry);
                self.succeeded += 1;
                self.total_bytes += bytes;
            }
            Ok(Err(e)) => {
                warn!("{}", e);
                self.failed += 1;
            }
            Err(e) => {
                warn!("Copy task panicked: {}", e);
                self.failed += 1;
            }
        }
    }

    /// Count a file that was never handed to a worker
    fn reject(&mut self, error: MirrorError) {
        warn!("{}", error);
        self.failed += 1;
    }

    fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Copy one file under `backup_root`, mirroring its relative path.
async fn backup_file(entry: &FileEntry, backup_root: &Path) -> CopyOutcome {
    let dest: PathBuf = backup_root.join(&entry.relative_path);
    let copy_error = |source: std::io::Error| MirrorError::Copy {
        path: entry.source_path.clone(),
        source,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(copy_error)?;
    }

    let (fingerprint, bytes) = copy_with_fingerprint(&entry.source_path, &dest)
        .await
        .map_err(copy_error)?;

    debug!(
        "Backed up {} -> {} ({})",
        entry.source_path.display(),
        dest.display(),
        fingerprint
    );

    Ok((
        ManifestEntry {
            backup_path: dest,
            fingerprint,
        },
        bytes,
    ))
}
