//! Continuous workspace replication (spec.md section 4.5): keeps the
//! CPU standby's copy of the workspace within one sync interval of the
//! GPU's, via a two-hop push (GPU -> this process -> CPU mirror)
//! rather than a direct GPU-to-CPU SSH hop, so neither side needs to
//! trust the other's host key.

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::workspace_fs::WorkspaceFs;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub files_pushed: usize,
    pub files_deleted: usize,
    pub bytes_transferred: u64,
    pub synced_at: Option<DateTime<Utc>>,
}

/// One instance is owned per [`crate::types::StandbyAssociation`]; its
/// internal lock is what gives "sync cycles for the same association
/// never overlap" (spec.md section 5, ordering guarantees) rather than
/// leaving that invariant to the caller.
pub struct SyncService {
    lock: Mutex<()>,
}

impl Default for SyncService {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncService {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// Pulls the source's current listing, pushes every changed or new
    /// file to dest, and deletes dest files no longer present on
    /// source. Excluded paths (spec.md section 6, `exclude_patterns`)
    /// are skipped on both sides.
    #[instrument(skip(self, source, dest))]
    pub async fn sync_once(
        &self,
        source: &dyn WorkspaceFs,
        dest: &dyn WorkspaceFs,
        workspace: &str,
        config: &OrchestratorConfig,
    ) -> Result<SyncOutcome> {
        let _guard = self.lock.lock().await;

        source.sync_clock().await?;
        dest.sync_clock().await?;

        let source_listing = source.list_files(workspace).await?;
        let dest_listing = dest.list_files(workspace).await?;

        let mut outcome = SyncOutcome::default();

        for (relpath, meta) in &source_listing {
            if config.is_excluded(relpath) {
                continue;
            }
            let unchanged = dest_listing
                .get(relpath)
                .map(|d| d.size == meta.size && d.mtime == meta.mtime)
                .unwrap_or(false);
            if unchanged {
                continue;
            }

            let data = source.read_file(workspace, relpath).await?;
            dest.write_file(workspace, relpath, &data, meta.mtime).await?;
            outcome.bytes_transferred += data.len() as u64;
            outcome.files_pushed += 1;
        }

        for relpath in dest_listing.keys() {
            if config.is_excluded(relpath) {
                continue;
            }
            if !source_listing.contains_key(relpath) {
                dest.delete_file(workspace, relpath).await?;
                outcome.files_deleted += 1;
            }
        }

        let now = Utc::now();
        outcome.synced_at = Some(now);

        if outcome.files_pushed > 0 || outcome.files_deleted > 0 {
            info!(
                workspace,
                pushed = outcome.files_pushed,
                deleted = outcome.files_deleted,
                bytes = outcome.bytes_transferred,
                "sync cycle completed"
            );
        } else {
            debug!(workspace, "sync cycle completed, nothing changed");
        }

        Ok(outcome)
    }

    /// Runs `sync_once` on a fixed interval until `cancel` resolves.
    /// The caller is responsible for surfacing returned errors (spec.md
    /// section 4.5: "a single failed cycle is logged and retried next
    /// interval, not escalated").
    pub async fn run_forever<F>(
        &self,
        source: &dyn WorkspaceFs,
        dest: &dyn WorkspaceFs,
        workspace: &str,
        config: &OrchestratorConfig,
        mut on_outcome: F,
        cancel: tokio_util::sync::CancellationToken,
    ) where
        F: FnMut(Result<SyncOutcome>) + Send,
    {
        let mut ticker = tokio::time::interval(config.sync_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let result = self.sync_once(source, dest, workspace, config).await;
                    if let Err(e) = &result {
                        warn!(workspace, error = %e, "sync cycle failed, will retry next interval");
                    }
                    on_outcome(result);
                }
            }
        }
    }
}
