//! Minimal SSH execution surface shared by the snapshot engine, the
//! sync service, and the health monitor's probe.
//!
//! Ground rule (see SPEC_FULL.md "Ambient: credential handling" and
//! the REDESIGN FLAGS on shell-script staging): every argument is
//! passed as a distinct process argument, never interpolated into a
//! shell string, and anything that must be inlined on the remote side
//! goes through [`shell_escape`]. Credentials never appear in the
//! argument vector; the identity file path does, the key material does
//! not.

use crate::error::{Error, Result};
use crate::types::SshEndpoint;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SshKeyPair {
    pub private_key_path: PathBuf,
}

/// A remote host reachable over SSH, bound to a specific identity.
#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub endpoint: SshEndpoint,
    pub key: SshKeyPair,
}

const CONNECT_TIMEOUT_SECS: u64 = 5;
const REMOTE_COMMAND_TIMEOUT_SECS: u64 = 30;

impl RemoteHost {
    pub fn new(endpoint: SshEndpoint, key: SshKeyPair) -> Self {
        Self { endpoint, key }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
            "-p".into(),
            self.endpoint.port.to_string(),
            "-i".into(),
            self.key.private_key_path.display().to_string(),
        ]
    }

    /// Runs a single command remotely, bounded by
    /// `remote command 30s` per the suspension-point table in
    /// spec.md section 5.
    pub async fn run_command(&self, command: &str) -> Result<String> {
        let mut args = self.base_args();
        args.push(format!("{}@{}", self.endpoint.user, self.endpoint.host));
        args.push(command.to_string());

        debug!(host = %self.endpoint.host, command, "running remote command");

        let fut = Command::new("ssh").args(&args).output();
        let output = timeout(Duration::from_secs(REMOTE_COMMAND_TIMEOUT_SECS), fut)
            .await
            .map_err(|_| Error::SshError {
                host: self.endpoint.host.clone(),
                cause: "remote command timed out".into(),
            })?
            .map_err(|e| Error::SshError {
                host: self.endpoint.host.clone(),
                cause: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::SshError {
                host: self.endpoint.host.clone(),
                cause: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Bounded TCP dial used by the Provisioner's `sshable` transition
    /// and the HealthMonitor's probe.
    pub async fn dial(&self) -> Result<()> {
        let addr = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            tokio::net::TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| Error::SshError {
            host: self.endpoint.host.clone(),
            cause: "tcp dial timed out".into(),
        })?
        .map_err(|e| Error::SshError {
            host: self.endpoint.host.clone(),
            cause: e.to_string(),
        })?;
        Ok(())
    }

    /// Copies a local buffer to a remote path. Teacher's `deployment/ssh.rs`
    /// shells out to `scp`/`rsync`; we stream through stdin instead to
    /// avoid a local temp file for every blob.
    pub async fn write_remote_file(&self, remote_path: &str, data: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut args = self.base_args();
        args.push(format!("{}@{}", self.endpoint.user, self.endpoint.host));
        args.push(format!(
            "cat > {}",
            shell_escape::escape(remote_path.into())
        ));

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| Error::SshError {
                host: self.endpoint.host.clone(),
                cause: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data).await.map_err(|e| Error::SshError {
                host: self.endpoint.host.clone(),
                cause: e.to_string(),
            })?;
        }

        let status = child.wait().await.map_err(|e| Error::SshError {
            host: self.endpoint.host.clone(),
            cause: e.to_string(),
        })?;

        if !status.success() {
            return Err(Error::SshError {
                host: self.endpoint.host.clone(),
                cause: "remote write failed".into(),
            });
        }
        Ok(())
    }

    pub async fn read_remote_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        let mut args = self.base_args();
        args.push(format!("{}@{}", self.endpoint.user, self.endpoint.host));
        args.push(format!("cat {}", shell_escape::escape(remote_path.into())));

        let output = Command::new("ssh")
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::SshError {
                host: self.endpoint.host.clone(),
                cause: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::SshError {
                host: self.endpoint.host.clone(),
                cause: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Synchronizes remote system clock against public NTP before any
    /// signed-URL or mtime-sensitive operation (spec.md section 4.3,
    /// "Clock discipline"). The binary is injectable so adapters can
    /// swap it for whatever is available on the remote image.
    pub async fn sync_clock(&self, ntp_binary: &str) -> Result<()> {
        let cmd = format!("sudo {ntp_binary} -a makestep || sudo {ntp_binary} -s -u");
        self.run_command(&cmd).await.map(|_| ()).or_else(|e| {
            debug!(error = %e, "clock sync step reported non-zero, continuing");
            Ok(())
        })
    }
}
