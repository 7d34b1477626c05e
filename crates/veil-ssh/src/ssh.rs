//! SSH implementation of the command channel

use async_ssh2_tokio::{AuthMethod, Client, ServerCheckMethod};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

use crate::{ChannelError, CommandChannel, Connector, ExecOutput, SshTarget};

/// A live SSH session against one remote host.
///
/// Remote hosts are provisioned from scratch, so the server key is not
/// checked against a known-hosts database.
pub struct SshChannel {
    client: Client,
}

impl SshChannel {
    /// Open a password-authenticated session.
    pub async fn connect(target: &SshTarget) -> Result<Self, ChannelError> {
        let auth = AuthMethod::with_password(&target.password);
        let client = Client::connect(
            (target.host.as_str(), target.port),
            &target.user,
            auth,
            ServerCheckMethod::NoCheck,
        )
        .await
        .map_err(|e| ChannelError::Connection(format!("{}:{}: {e}", target.host, target.port)))?;

        debug!(host = %target.host, port = target.port, "SSH session established");
        Ok(Self { client })
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, ChannelError> {
        let result = self
            .client
            .execute(command)
            .await
            .map_err(|e| ChannelError::Session(e.to_string()))?;

        debug!(command, exit_status = result.exit_status, "remote command finished");
        Ok(ExecOutput {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_status: result.exit_status,
        })
    }

    /// Writes go through the exec channel: the contents are base64-piped
    /// into a temporary file and renamed into place, so a concurrent reader
    /// never observes a half-written file.
    async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), ChannelError> {
        let encoded = BASE64.encode(contents.as_bytes());
        let command = format!(
            "printf '%s' '{encoded}' | base64 -d > '{path}.tmp' && mv '{path}.tmp' '{path}'"
        );

        let output = self.exec(&command).await?;
        if !output.success() {
            return Err(ChannelError::Transfer {
                path: path.to_string(),
                reason: format!("exit status {}: {}", output.exit_status, output.stderr),
            });
        }

        debug!(path, bytes = contents.len(), "remote file written");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ChannelError::Session(e.to_string()))
    }
}

/// Opens [`SshChannel`] sessions.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn CommandChannel>, ChannelError> {
        Ok(Box::new(SshChannel::connect(target).await?))
    }
}
