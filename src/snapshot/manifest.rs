//! Bit-exact manifest wire format (spec.md section 6).

use crate::types::{FileEntry, Snapshot, SnapshotCodec, SnapshotKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestWire {
    pub snapshot_id: String,
    pub parent_id: Option<String>,
    pub kind: String,
    pub created_at: i64,
    pub workspace_path: String,
    pub codec: String,
    pub files: HashMap<String, FileEntryWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntryWire {
    pub size: u64,
    pub mtime: i64,
    pub blob: String,
}

impl From<&Snapshot> for ManifestWire {
    fn from(s: &Snapshot) -> Self {
        ManifestWire {
            snapshot_id: s.snapshot_id.clone(),
            parent_id: s.parent_id.clone(),
            kind: match s.kind {
                SnapshotKind::Base => "base".to_string(),
                SnapshotKind::Incremental => "incremental".to_string(),
            },
            created_at: s.created_at.timestamp(),
            workspace_path: s.workspace_path.clone(),
            codec: match s.compression_codec {
                SnapshotCodec::Lz4 => "lz4".to_string(),
            },
            files: s
                .file_manifest
                .iter()
                .map(|(path, entry)| {
                    (
                        path.clone(),
                        FileEntryWire {
                            size: entry.size,
                            mtime: entry.mtime,
                            blob: entry.blob.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl ManifestWire {
    pub fn to_snapshot(&self, source_instance_id: &str, total_uncompressed: u64, total_stored: u64) -> Snapshot {
        Snapshot {
            snapshot_id: self.snapshot_id.clone(),
            kind: if self.kind == "base" {
                SnapshotKind::Base
            } else {
                SnapshotKind::Incremental
            },
            parent_id: self.parent_id.clone(),
            created_at: DateTime::<Utc>::from_timestamp(self.created_at, 0).unwrap_or_else(Utc::now),
            source_instance_id: source_instance_id.to_string(),
            workspace_path: self.workspace_path.clone(),
            file_manifest: self
                .files
                .iter()
                .map(|(path, entry)| {
                    (
                        path.clone(),
                        FileEntry {
                            size: entry.size,
                            mtime: entry.mtime,
                            blob: entry.blob.clone(),
                        },
                    )
                })
                .collect(),
            total_bytes_uncompressed: total_uncompressed,
            total_bytes_stored: total_stored,
            compression_codec: SnapshotCodec::Lz4,
        }
    }

    pub fn manifest_key(snapshot_id: &str) -> String {
        format!("snapshots/{snapshot_id}/manifest.json")
    }
}

pub fn path_hash(relpath: &str) -> String {
    hex::encode(Sha256::digest(relpath.as_bytes()))
}

/// `snapshots/{snapshot_id}/blobs/{sha256(path)[0:2]}/{sha256(path)}`
/// exactly as specified in spec.md section 6.
pub fn blob_key(snapshot_id: &str, relpath: &str) -> String {
    let digest = path_hash(relpath);
    format!("snapshots/{snapshot_id}/blobs/{}/{}", &digest[0..2], digest)
}
