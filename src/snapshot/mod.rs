//! Content-addressed snapshot engine (spec.md section 4.3): produce
//! and consume snapshots over object storage, minimizing bytes
//! transferred and supporting fast restore to a fresh host.

mod codec;
pub mod manifest;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::object_store::{put_parallel, ObjectStore};
use crate::types::{FileEntry, Snapshot, SnapshotCodec, SnapshotKind};
use crate::workspace_fs::WorkspaceFs;
use chrono::Utc;
use manifest::{blob_key, ManifestWire};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Per-file restore failure, reported back to the caller per spec.md
/// section 4.3's "a `restore` failure is reported per file."
#[derive(Debug, Clone)]
pub struct FileRestoreFailure {
    pub relpath: String,
    pub reason: String,
}

pub struct SnapshotEngine<S: ObjectStore> {
    store: Arc<S>,
    codec: SnapshotCodec,
    max_parallel_blobs: usize,
}

impl<S: ObjectStore> SnapshotEngine<S> {
    pub fn new(store: Arc<S>, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            codec: config.snapshot_codec,
            max_parallel_blobs: config.max_concurrent_launches.max(4),
        }
    }

    #[instrument(skip(self, source))]
    pub async fn create_full(
        &self,
        source: &dyn WorkspaceFs,
        workspace: &str,
        source_instance_id: &str,
    ) -> Result<Snapshot> {
        source.sync_clock().await?;
        let snapshot_id = format!("snap-{}", Uuid::new_v4());
        let listing = source.list_files(workspace).await?;

        let mut file_manifest = HashMap::new();
        let mut total_uncompressed = 0u64;
        let mut total_stored = 0u64;
        let mut blobs = Vec::with_capacity(listing.len());

        for (relpath, meta) in &listing {
            let data = source.read_file(workspace, relpath).await?;
            let compressed = codec::compress(self.codec, &data);
            total_uncompressed += meta.size;
            total_stored += compressed.len() as u64;

            let hash = manifest::path_hash(relpath);
            file_manifest.insert(
                relpath.clone(),
                FileEntry {
                    size: meta.size,
                    mtime: meta.mtime,
                    blob: hash,
                },
            );
            blobs.push((blob_key(&snapshot_id, relpath), compressed));
        }

        put_parallel(self.store.as_ref(), blobs, self.max_parallel_blobs).await?;

        let snapshot = Snapshot {
            snapshot_id: snapshot_id.clone(),
            kind: SnapshotKind::Base,
            parent_id: None,
            created_at: Utc::now(),
            source_instance_id: source_instance_id.to_string(),
            workspace_path: workspace.to_string(),
            file_manifest,
            total_bytes_uncompressed: total_uncompressed,
            total_bytes_stored: total_stored,
            compression_codec: self.codec,
        };

        self.write_manifest(&snapshot).await?;
        info!(snapshot_id, files = listing.len(), "created full snapshot");
        Ok(snapshot)
    }

    #[instrument(skip(self, source))]
    pub async fn create_incremental(
        &self,
        source: &dyn WorkspaceFs,
        workspace: &str,
        source_instance_id: &str,
        base_snapshot_id: &str,
    ) -> Result<Snapshot> {
        let base = self.fetch_manifest(base_snapshot_id).await?;
        if base.workspace_path != workspace {
            return Err(Error::ConfigurationError(format!(
                "base snapshot {base_snapshot_id} targets a different workspace path"
            )));
        }

        source.sync_clock().await?;
        let snapshot_id = format!("snap-{}", Uuid::new_v4());
        let listing = source.list_files(workspace).await?;

        let mut file_manifest = HashMap::new();
        let mut total_uncompressed = 0u64;
        let mut total_stored = 0u64;
        let mut blobs = Vec::new();
        let mut changed = 0usize;

        for (relpath, meta) in &listing {
            total_uncompressed += meta.size;
            let hash = manifest::path_hash(relpath);

            let unchanged = base
                .file_manifest
                .get(relpath)
                .map(|prev| prev.size == meta.size && prev.mtime == meta.mtime)
                .unwrap_or(false);

            if unchanged {
                file_manifest.insert(
                    relpath.clone(),
                    FileEntry {
                        size: meta.size,
                        mtime: meta.mtime,
                        blob: hash,
                    },
                );
                continue;
            }

            let data = source.read_file(workspace, relpath).await?;
            let compressed = codec::compress(self.codec, &data);
            total_stored += compressed.len() as u64;
            changed += 1;

            file_manifest.insert(
                relpath.clone(),
                FileEntry {
                    size: meta.size,
                    mtime: meta.mtime,
                    blob: hash,
                },
            );
            blobs.push((blob_key(&snapshot_id, relpath), compressed));
        }

        put_parallel(self.store.as_ref(), blobs, self.max_parallel_blobs).await?;

        let snapshot = Snapshot {
            snapshot_id: snapshot_id.clone(),
            kind: SnapshotKind::Incremental,
            parent_id: Some(base_snapshot_id.to_string()),
            created_at: Utc::now(),
            source_instance_id: source_instance_id.to_string(),
            workspace_path: workspace.to_string(),
            file_manifest,
            total_bytes_uncompressed: total_uncompressed,
            total_bytes_stored: total_stored,
            compression_codec: self.codec,
        };

        self.write_manifest(&snapshot).await?;
        info!(
            snapshot_id,
            base_snapshot_id, changed_files = changed, "created incremental snapshot"
        );
        Ok(snapshot)
    }

    /// Downloads the manifest and reconstructs the file set, fetching
    /// each blob from the nearest ancestor that actually holds it
    /// (unchanged files are never re-uploaded, so only one ancestor in
    /// the chain physically stores a given path's bytes).
    #[instrument(skip(self, target))]
    pub async fn restore(
        &self,
        target: &dyn WorkspaceFs,
        workspace: &str,
        snapshot_id: &str,
    ) -> Result<Vec<FileRestoreFailure>> {
        target.sync_clock().await?;
        let target_snapshot = self.fetch_manifest(snapshot_id).await?;
        let chain = self.ancestor_chain(snapshot_id).await?;

        let mut failures = Vec::new();
        for (relpath, entry) in &target_snapshot.file_manifest {
            match self.locate_and_fetch_blob(&chain, relpath).await {
                Ok(compressed) => match codec::decompress(self.codec, &compressed) {
                    Ok(data) => {
                        if let Err(e) = target.write_file(workspace, relpath, &data, entry.mtime).await {
                            failures.push(FileRestoreFailure {
                                relpath: relpath.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                    Err(e) => failures.push(FileRestoreFailure {
                        relpath: relpath.clone(),
                        reason: e.to_string(),
                    }),
                },
                Err(e) => failures.push(FileRestoreFailure {
                    relpath: relpath.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            info!(snapshot_id, files = target_snapshot.file_manifest.len(), "restore complete");
        } else {
            warn!(snapshot_id, failed = failures.len(), "restore completed with per-file failures");
        }
        Ok(failures)
    }

    /// Re-lists files on target and confirms every manifest entry
    /// exists with matching size. A mismatch is reported; the caller
    /// (failover/recovery) decides restore is all-or-nothing.
    #[instrument(skip(self, target))]
    pub async fn validate(
        &self,
        target: &dyn WorkspaceFs,
        workspace: &str,
        snapshot_id: &str,
    ) -> Result<bool> {
        let snapshot = self.fetch_manifest(snapshot_id).await?;
        let present = target.list_files(workspace).await?;

        for (relpath, entry) in &snapshot.file_manifest {
            match present.get(relpath) {
                Some(meta) if meta.size == entry.size => continue,
                Some(_) => {
                    warn!(snapshot_id, relpath, "validate: size mismatch");
                    return Ok(false);
                }
                None => {
                    warn!(snapshot_id, relpath, "validate: file missing on target");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn locate_and_fetch_blob(&self, chain: &[Snapshot], relpath: &str) -> Result<Vec<u8>> {
        for snap in chain.iter().rev() {
            let key = blob_key(&snap.snapshot_id, relpath);
            if self.store.exists(&key).await? {
                return self.store.get(&key).await;
            }
        }
        Err(Error::ObjectStoreError {
            operation: "locate_blob".into(),
            key: relpath.to_string(),
            cause: "blob not found in any ancestor of the restore chain".into(),
        })
    }

    /// `base -> inc1 -> ... -> target`, oldest first. Cycles are
    /// impossible because `parent_id` strictly decreases in time
    /// (see spec.md section 3 invariants); we still cap depth as a
    /// defensive bound.
    async fn ancestor_chain(&self, snapshot_id: &str) -> Result<Vec<Snapshot>> {
        let mut chain = Vec::new();
        let mut current = Some(snapshot_id.to_string());
        let mut depth = 0;
        while let Some(id) = current {
            depth += 1;
            if depth > 10_000 {
                return Err(Error::Other("snapshot chain exceeds sane depth".into()));
            }
            let snap = self.fetch_manifest(&id).await?;
            current = snap.parent_id.clone();
            chain.push(snap);
        }
        chain.reverse();
        Ok(chain)
    }

    async fn fetch_manifest(&self, snapshot_id: &str) -> Result<Snapshot> {
        let key = ManifestWire::manifest_key(snapshot_id);
        let bytes = self.store.get(&key).await?;
        let wire: ManifestWire = serde_json::from_slice(&bytes)?;
        let uncompressed: u64 = wire.files.values().map(|f| f.size).sum();
        Ok(wire.to_snapshot(snapshot_id, uncompressed, 0))
    }

    /// The manifest is the commit point and is written last, so a
    /// `create_*` failure never leaves a referenceable-but-partial
    /// snapshot (spec.md section 4.3, "Failure semantics").
    async fn write_manifest(&self, snapshot: &Snapshot) -> Result<()> {
        let wire = ManifestWire::from(snapshot);
        let bytes = serde_json::to_vec_pretty(&wire)?;
        self.store
            .put(&ManifestWire::manifest_key(&snapshot.snapshot_id), bytes)
            .await
    }
}
