//! Auto Backup Agent Library
//!
//! Mirrors a working tree onto a writable volume, records a content
//! fingerprint for every copied file, and keeps the live tree repaired from
//! the mirror with background reconciliation daemons.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod lifecycle;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use lifecycle::{Lifecycle, LifecycleState, Status};
pub use utils::errors::MirrorError;
pub type Result<T> = std::result::Result<T, MirrorError>;
