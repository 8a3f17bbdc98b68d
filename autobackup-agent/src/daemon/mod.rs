//! Long-running background tasks: reconciliation daemons and signal handling.

pub mod reconcile;
pub mod shutdown;

use crate::executor::manifest::Manifest;
use reconcile::ReconcileDaemon;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The set of running reconciliation daemons, one per manifest shard.
pub struct DaemonSet {
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DaemonSet {
    /// Shard `manifest` and spawn one daemon per shard.
    pub fn spawn(
        manifest: &Manifest,
        backup_root: &Path,
        live_root: &Path,
        daemons: usize,
        poll_interval: Duration,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let shards = manifest.shard(daemons);

        let handles: Vec<JoinHandle<()>> = shards
            .into_iter()
            .enumerate()
            .map(|(id, shard)| {
                let daemon = ReconcileDaemon::new(
                    id,
                    shard,
                    backup_root.to_path_buf(),
                    live_root.to_path_buf(),
                    poll_interval,
                    cancel_token.child_token(),
                );
                tokio::spawn(daemon.run())
            })
            .collect();

        info!(
            "Started {} reconcile daemons for {} files",
            handles.len(),
            manifest.len()
        );

        Self {
            cancel_token,
            handles,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every daemon and wait (bounded) for them to exit.
    pub async fn stop(self, grace: Duration) {
        self.cancel_token.cancel();

        for handle in self.handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!("Reconcile daemon panicked: {}", e),
                Err(_) => {
                    warn!("Reconcile daemon did not stop within {:?}, aborting", grace);
                    abort.abort();
                }
            }
        }

        info!("All reconcile daemons stopped");
    }
}
