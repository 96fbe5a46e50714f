//! Remote command sessions.
//!
//! A [`RemoteSession`] is an already-established way of running a command
//! on another cluster member. The runtime never opens connections itself;
//! the driver hands sessions in through the node configuration.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use bugcheck_core::{BugcheckError, Result};

/// Raw process output as returned by a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Raw stdout bytes
    pub stdout: Vec<u8>,
    /// Raw stderr bytes
    pub stderr: Vec<u8>,
    /// Remote exit status
    pub exit_code: i32,
}

/// A handle able to run commands on one remote host
#[async_trait]
pub trait RemoteSession: fmt::Debug + Send + Sync {
    /// Host this session is connected to
    fn host(&self) -> &str;

    /// User the session authenticates as, if known
    fn username(&self) -> Option<&str>;

    /// Run `command` and wait for it to finish.
    ///
    /// `timeout` of `None` waits forever.
    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<RawOutput>;
}

/// Session backed by the system `ssh` client in batch mode
#[derive(Debug, Clone)]
pub struct SshSession {
    host: String,
    username: Option<String>,
    port: Option<u16>,
    identity: Option<PathBuf>,
}

impl SshSession {
    /// Create a session for `host` using the ssh client defaults
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            port: None,
            identity: None,
        }
    }

    /// Log in as `username`
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Connect to a non-default port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Authenticate with a specific private key
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<PathBuf>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    fn destination(&self) -> String {
        self.username.as_ref().map_or_else(
            || self.host.clone(),
            |user| format!("{user}@{}", self.host),
        )
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"]);
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(self.destination())
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<RawOutput> {
        debug!(host = %self.host, command, "ssh exec");
        let child = self.command(command).output();

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| BugcheckError::Timeout(limit.as_secs()))?,
            None => child.await,
        }
        .map_err(|e| BugcheckError::Session {
            host: self.host.clone(),
            reason: e.to_string(),
        })?;

        // ssh reserves 255 for its own failures
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == 255 {
            return Err(BugcheckError::Session {
                host: self.host.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(RawOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_includes_user() {
        let session = SshSession::new("cvp2.example.com").with_username("root");
        assert_eq!(session.destination(), "root@cvp2.example.com");
        assert_eq!(session.username(), Some("root"));
        assert_eq!(SshSession::new("cvp3").destination(), "cvp3");
    }

    #[test]
    fn command_line_is_batch_mode() {
        let session = SshSession::new("cvp2")
            .with_port(2222)
            .with_identity("/root/.ssh/id_ed25519");
        let cmd = session.command("uptime");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0..2], ["-o", "BatchMode=yes"]);
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/root/.ssh/id_ed25519"]));
        assert_eq!(args[args.len() - 2..], ["cvp2", "uptime"]);
    }
}
