//! Abstraction over "a workspace subtree on a remote host" used by the
//! SnapshotEngine and SyncService. The production implementation
//! drives [`crate::ssh::RemoteHost`]; tests use [`InMemoryWorkspaceFs`].

use crate::error::Result;
use crate::ssh::{RemoteHost, SshKeyPair};
use crate::types::SshEndpoint;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileMeta {
    pub size: u64,
    pub mtime: i64,
}

/// A workspace subtree the SnapshotEngine/SyncService can list, read
/// from, and write to. One implementor drives a real SSH host; the
/// in-memory one backs unit tests without a network dependency.
#[auto_impl::auto_impl(&, Arc)]
#[async_trait]
pub trait WorkspaceFs: Send + Sync + 'static {
    async fn list_files(&self, workspace: &str) -> Result<BTreeMap<String, RemoteFileMeta>>;
    async fn read_file(&self, workspace: &str, relpath: &str) -> Result<Vec<u8>>;
    async fn write_file(&self, workspace: &str, relpath: &str, data: &[u8], mtime: i64) -> Result<()>;
    async fn delete_file(&self, workspace: &str, relpath: &str) -> Result<()>;

    /// Aligns the host's clock before any mtime-sensitive snapshot or
    /// sync operation (spec.md sections 4.3/9): mtime comparisons across
    /// hosts are only meaningful once both sides agree on the time.
    async fn sync_clock(&self) -> Result<()>;
}

/// In-memory double keyed by `(workspace, relpath)`. Deterministic,
/// no network, used across snapshot/sync/standby tests.
#[derive(Default)]
pub struct InMemoryWorkspaceFs {
    files: parking_lot::Mutex<BTreeMap<(String, String), (Vec<u8>, i64)>>,
}

impl InMemoryWorkspaceFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, workspace: &str, relpath: &str, data: Vec<u8>, mtime: i64) {
        self.files
            .lock()
            .insert((workspace.to_string(), relpath.to_string()), (data, mtime));
    }

    pub fn contents(&self, workspace: &str) -> BTreeMap<String, Vec<u8>> {
        self.files
            .lock()
            .iter()
            .filter(|((ws, _), _)| ws == workspace)
            .map(|((_, path), (data, _))| (path.clone(), data.clone()))
            .collect()
    }
}

#[async_trait]
impl WorkspaceFs for InMemoryWorkspaceFs {
    async fn list_files(&self, workspace: &str) -> Result<BTreeMap<String, RemoteFileMeta>> {
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|((ws, _), _)| ws == workspace)
            .map(|((_, path), (data, mtime))| {
                (
                    path.clone(),
                    RemoteFileMeta {
                        size: data.len() as u64,
                        mtime: *mtime,
                    },
                )
            })
            .collect())
    }

    async fn read_file(&self, workspace: &str, relpath: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .get(&(workspace.to_string(), relpath.to_string()))
            .map(|(data, _)| data.clone())
            .ok_or_else(|| crate::error::Error::Other(format!("no such file: {relpath}")))
    }

    async fn write_file(&self, workspace: &str, relpath: &str, data: &[u8], mtime: i64) -> Result<()> {
        self.files.lock().insert(
            (workspace.to_string(), relpath.to_string()),
            (data.to_vec(), mtime),
        );
        Ok(())
    }

    async fn delete_file(&self, workspace: &str, relpath: &str) -> Result<()> {
        self.files
            .lock()
            .remove(&(workspace.to_string(), relpath.to_string()));
        Ok(())
    }

    async fn sync_clock(&self) -> Result<()> {
        Ok(())
    }
}

/// Production [`WorkspaceFs`] backed by a real SSH host. Listing shells
/// out to `find` with a tab-separated `-printf` format rather than
/// parsing `ls -l`, since `find`'s output doesn't depend on locale or
/// column width. Every path is shell-escaped before being interpolated
/// into the remote command string (see `crate::ssh` for the rule).
pub struct SshWorkspaceFs {
    host: RemoteHost,
    ntp_binary: String,
}

impl SshWorkspaceFs {
    pub fn new(endpoint: SshEndpoint, key: SshKeyPair) -> Self {
        Self {
            host: RemoteHost::new(endpoint, key),
            ntp_binary: "chronyc".to_string(),
        }
    }

    fn remote_path(workspace: &str, relpath: &str) -> String {
        format!("{}/{}", workspace.trim_end_matches('/'), relpath)
    }
}

#[async_trait]
impl WorkspaceFs for SshWorkspaceFs {
    async fn list_files(&self, workspace: &str) -> Result<BTreeMap<String, RemoteFileMeta>> {
        let command = format!(
            "find {} -type f -printf '%P\\t%s\\t%T@\\n'",
            shell_escape::escape(workspace.into())
        );
        let output = self.host.run_command(&command).await?;

        let mut out = BTreeMap::new();
        for line in output.lines() {
            let mut parts = line.splitn(3, '\t');
            let (Some(relpath), Some(size_str), Some(mtime_str)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let size: u64 = size_str.parse().unwrap_or(0);
            let mtime = mtime_str.parse::<f64>().unwrap_or(0.0) as i64;
            out.insert(relpath.to_string(), RemoteFileMeta { size, mtime });
        }
        Ok(out)
    }

    async fn read_file(&self, workspace: &str, relpath: &str) -> Result<Vec<u8>> {
        self.host
            .read_remote_file(&Self::remote_path(workspace, relpath))
            .await
    }

    async fn write_file(&self, workspace: &str, relpath: &str, data: &[u8], mtime: i64) -> Result<()> {
        let path = Self::remote_path(workspace, relpath);
        if let Some(parent) = Path::new(&path).parent() {
            let mkdir = format!("mkdir -p {}", shell_escape::escape(parent.display().to_string().into()));
            self.host.run_command(&mkdir).await?;
        }
        self.host.write_remote_file(&path, data).await?;
        let touch = format!("touch -d @{mtime} {}", shell_escape::escape(path.clone().into()));
        self.host.run_command(&touch).await?;
        Ok(())
    }

    async fn delete_file(&self, workspace: &str, relpath: &str) -> Result<()> {
        let path = Self::remote_path(workspace, relpath);
        let command = format!("rm -f {}", shell_escape::escape(path.into()));
        self.host.run_command(&command).await.map(|_| ())
    }

    async fn sync_clock(&self) -> Result<()> {
        self.host.sync_clock(&self.ntp_binary).await
    }
}
