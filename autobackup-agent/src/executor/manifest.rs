//! Integrity manifest: backup destination path -> expected content fingerprint.
//!
//! Serialized as a flat JSON object (`backup_manifest.json` in the backup
//! root). A manifest is written once, atomically, after a pass completes and
//! is read-only from then on.

use crate::fs::atomic::atomic_write;
use crate::fs::fingerprint::ContentFingerprint;
use crate::utils::errors::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// One tracked file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub backup_path: PathBuf,
    pub fingerprint: ContentFingerprint,
}

/// Backup manifest, keyed by absolute backup path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    files: BTreeMap<PathBuf, ContentFingerprint>,
}

/// A disjoint slice of manifest entries owned by one reconciliation daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shard {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry. Returns the fingerprint previously stored under the
    /// same backup path, if any.
    pub fn insert(&mut self, entry: ManifestEntry) -> Option<ContentFingerprint> {
        self.files.insert(entry.backup_path, entry.fingerprint)
    }

    pub fn get(&self, backup_path: &Path) -> Option<&ContentFingerprint> {
        self.files.get(backup_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = ManifestEntry> + '_ {
        self.files.iter().map(|(path, fp)| ManifestEntry {
            backup_path: path.clone(),
            fingerprint: *fp,
        })
    }

    /// Split into at most `count` contiguous, non-empty shards.
    ///
    /// Shards are disjoint and together cover every entry. An empty manifest
    /// yields no shards.
    pub fn shard(&self, count: usize) -> Vec<Shard> {
        if self.files.is_empty() {
            return Vec::new();
        }

        let count = count.clamp(1, self.files.len());
        let per_shard = self.files.len().div_ceil(count);
        let entries: Vec<ManifestEntry> = self.entries().collect();

        entries
            .chunks(per_shard)
            .map(|chunk| Shard {
                entries: chunk.to_vec(),
            })
            .collect()
    }

    /// Persist atomically: temp file in the same directory, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &body)?;

        info!("Manifest saved to {} ({} files)", path.display(), self.len());
        Ok(())
    }

    /// Load a persisted manifest. Any read or parse failure is a `ManifestLoad`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|e| MirrorError::ManifestLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&content).map_err(|e| MirrorError::ManifestLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
