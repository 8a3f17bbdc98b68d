//! Custom error types for the mirror agent.

use crate::fs::fingerprint::ContentFingerprint;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No writable backup target found")]
    TargetUnavailable,

    #[error("Failed to back up {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load manifest {}: {reason}", .path.display())]
    ManifestLoad { path: PathBuf, reason: String },

    #[error("Failed to restore {}: {source}", .path.display())]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup copy missing: {}", .0.display())]
    BackupCopyMissing(PathBuf),

    #[error("Backup copy {} no longer matches the manifest ({actual} != {expected})", .path.display())]
    BackupCopyTampered {
        path: PathBuf,
        expected: ContentFingerprint,
        actual: ContentFingerprint,
    },

    #[error("Refusing to back up {}: its copy would replace the manifest", .0.display())]
    ReservedPath(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Backup pass cancelled")]
    Cancelled,

    #[error("Daemon error: {0}")]
    Daemon(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;
