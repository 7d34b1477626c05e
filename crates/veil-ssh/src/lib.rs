//! SSH command channel for remote provisioning
//!
//! Everything the provisioning workflow does on a remote host goes through
//! the [`CommandChannel`] trait: one command at a time, full file writes,
//! and path existence checks. The [`SshChannel`] implementation drives a
//! real SSH session; tests drive the workflow with in-memory fakes instead.

pub mod ssh;

pub use ssh::{SshChannel, SshConnector};

use async_trait::async_trait;
use thiserror::Error;

/// Command channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {0}")]
    Connection(String),

    #[error("Command '{command}' failed with exit status {exit_status}: {stderr}")]
    Command {
        command: String,
        exit_status: u32,
        stderr: String,
    },

    #[error("File transfer to '{path}' failed: {reason}")]
    Transfer { path: String, reason: String },

    #[error("SSH session error: {0}")]
    Session(String),
}

/// Result of a single remote command execution.
///
/// A nonzero `exit_status` is not an error at this layer; callers that
/// cannot recover use [`CommandChannel::exec_checked`] instead.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Connection parameters for a remote host.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }
}

/// An authenticated session against one remote host.
///
/// Operations act on live remote state and nothing is transactional across
/// commands: a failure mid-sequence leaves the host partially modified, and
/// the next provisioning attempt sees that as the host's existing install.
#[async_trait]
pub trait CommandChannel: Send {
    /// Run a command and report its exit status without judging it.
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, ChannelError>;

    /// Run a command that has no recovery path on failure.
    async fn exec_checked(&mut self, command: &str) -> Result<String, ChannelError> {
        let output = self.exec(command).await?;
        if !output.success() {
            return Err(ChannelError::Command {
                command: command.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    /// Test whether a path exists on the remote host.
    async fn path_exists(&mut self, path: &str) -> Result<bool, ChannelError> {
        let output = self.exec(&format!("test -e '{path}'")).await?;
        Ok(output.success())
    }

    /// Write the full contents of a remote file.
    async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), ChannelError>;

    /// Release the session.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens command channels. The provisioning orchestrator is generic over
/// this seam so tests can hand it scripted channels.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn CommandChannel>, ChannelError>;
}
