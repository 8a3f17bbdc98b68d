//! File system helpers: target discovery, tree walking and fingerprints.

pub mod atomic;
pub mod fingerprint;
pub mod targets;
pub mod walker;
