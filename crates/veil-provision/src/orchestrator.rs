//! Provisioning state machine
//!
//! A strict linear sequence:
//!
//! `connect → check → [cleanup] → install → keys → config → verify → done`
//!
//! Each step emits in-progress/done events into a channel the caller
//! consumes as a stream, so partial progress is visible while remote
//! commands run. The only branches are the overwrite fork at `check` and
//! the terminal fork on failure. Nothing retries; a failed run leaves the
//! host as-is and the next attempt sees that partial state as an existing
//! install.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use veil_registry::{NewClient, NewServer, ProxyRegistry};
use veil_ssh::{CommandChannel, Connector, SshTarget};
use veil_xray::{qr_png_base64, vless_link, ClientIdentity, ConfigParams, KeyPair, CONFIG_PATH};

use crate::commands;
use crate::event::{Phase, ProvisionEvent, Step};
use crate::probe::Probe;
use crate::{ProvisionError, DEFAULT_CLIENT_USERNAME};

/// Immutable input to one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub server_ip: String,
    pub ssh_user: String,
    pub ssh_password: String,
    pub ssh_port: u16,
    pub mask_domain: String,
    pub proxy_name: String,
    pub overwrite: bool,
}

impl ProvisioningRequest {
    fn target(&self) -> SshTarget {
        SshTarget::new(
            self.server_ip.clone(),
            self.ssh_port,
            self.ssh_user.clone(),
            self.ssh_password.clone(),
        )
    }
}

/// Values a successful run produces for result assembly and persistence.
struct Provisioned {
    client_id: Uuid,
    public_key: String,
}

/// Run the provisioning workflow as an independent task and stream its
/// progress events.
///
/// The stream yields any number of `Status` events followed by exactly one
/// terminal event. Dropping the stream early does not leak the SSH
/// session; the release obligation lives inside the workflow.
pub fn provision(
    request: ProvisioningRequest,
    connector: Arc<dyn Connector>,
    registry: Arc<dyn ProxyRegistry>,
    probe: Arc<dyn Probe>,
) -> ReceiverStream<ProvisionEvent> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let events = EventSink { tx };
        let outcome = execute(&request, connector.as_ref(), registry.as_ref(), probe.as_ref(), &events).await;

        let terminal = match outcome {
            Ok(done) => match assemble_result(&request, &done) {
                Ok(event) => event,
                Err(e) => ProvisionEvent::Error { message: e.to_string() },
            },
            Err(ProvisionError::AlreadyProvisioned) => ProvisionEvent::Exists,
            Err(e) => ProvisionEvent::Error { message: e.to_string() },
        };
        events.emit(terminal).await;
    });

    ReceiverStream::new(rx)
}

/// Derives the share link and QR image from already-computed values; not a
/// workflow state of its own.
fn assemble_result(
    request: &ProvisioningRequest,
    done: &Provisioned,
) -> Result<ProvisionEvent, ProvisionError> {
    let link = vless_link(
        &done.client_id,
        &request.server_ip,
        &request.mask_domain,
        &done.public_key,
        &request.proxy_name,
    );
    let qr_code = qr_png_base64(&link)?;

    Ok(ProvisionEvent::Result {
        vless_link: link,
        qr_code,
    })
}

async fn execute(
    request: &ProvisioningRequest,
    connector: &dyn Connector,
    registry: &dyn ProxyRegistry,
    probe: &dyn Probe,
    events: &EventSink,
) -> Result<Provisioned, ProvisionError> {
    events.begin(Step::Connect).await;
    let mut channel = connector.connect(&request.target()).await?;
    events.end(Step::Connect).await;

    let result = configure(request, channel.as_mut(), registry, probe, events).await;

    // The session is released on every exit path, success or failure.
    if let Err(e) = channel.close().await {
        warn!(host = %request.server_ip, error = %e, "failed to close command channel");
    }

    result
}

async fn configure(
    request: &ProvisioningRequest,
    channel: &mut dyn CommandChannel,
    registry: &dyn ProxyRegistry,
    probe: &dyn Probe,
    events: &EventSink,
) -> Result<Provisioned, ProvisionError> {
    events.begin(Step::Check).await;
    let installed = channel.path_exists(CONFIG_PATH).await?;
    if installed && !request.overwrite {
        return Err(ProvisionError::AlreadyProvisioned);
    }
    events.end(Step::Check).await;

    if request.overwrite {
        events.begin(Step::Cleanup).await;

        // Local rows go first so stale state cannot resurrect after
        // reprovisioning, whatever happens on the remote side.
        for server_id in registry.delete_servers_by_ip(&request.server_ip).await? {
            registry.delete_clients_by_server_id(server_id).await?;
        }

        // Remote teardown is best effort: the install steps below handle a
        // dirty host.
        match channel.exec(&commands::cleanup()).await {
            Ok(output) if !output.success() => {
                warn!(
                    host = %request.server_ip,
                    exit_status = output.exit_status,
                    stderr = %output.stderr,
                    "remote cleanup failed, reinstalling over existing state"
                );
            }
            Err(e) => {
                warn!(
                    host = %request.server_ip,
                    error = %e,
                    "remote cleanup failed, reinstalling over existing state"
                );
            }
            Ok(_) => {}
        }

        events.end(Step::Cleanup).await;
    }

    events.begin(Step::Install).await;
    channel.exec_checked(commands::CHECK_CURL).await?;
    channel.exec_checked(commands::INSTALL_XRAY).await?;
    channel.exec_checked(&commands::prepare_log_dir()).await?;
    events.end(Step::Install).await;

    events.begin(Step::Keys).await;
    let keygen_output = channel.exec_checked(&commands::keygen()).await?;
    let keys = KeyPair::extract(&keygen_output)?;
    events.end(Step::Keys).await;

    events.begin(Step::Config).await;
    let client_id = Uuid::new_v4();
    let identities = [ClientIdentity::new(client_id, DEFAULT_CLIENT_USERNAME)];
    let document = ConfigParams {
        mask_domain: &request.mask_domain,
        private_key: &keys.private_key,
        clients: &identities,
    }
    .build();
    channel.write_file(CONFIG_PATH, &document.to_json()?).await?;
    channel.exec_checked(&commands::restart()).await?;
    channel.exec_checked(&commands::status()).await?;
    events.end(Step::Config).await;

    events.begin(Step::Verify).await;
    if !probe.verify(&request.server_ip, &request.mask_domain).await {
        return Err(ProvisionError::Verification);
    }
    events.end(Step::Verify).await;

    // Persist only after the listener has proven itself; the registry
    // never records a proxy that is not actually reachable.
    events.begin(Step::Done).await;
    let server_id = registry
        .insert_server(NewServer {
            server_ip: request.server_ip.clone(),
            ssh_user: request.ssh_user.clone(),
            ssh_password: request.ssh_password.clone(),
            ssh_port: request.ssh_port,
            mask_domain: request.mask_domain.clone(),
            public_key: keys.public_key.clone(),
            proxy_name: request.proxy_name.clone(),
        })
        .await?;
    registry
        .insert_client(
            server_id,
            NewClient {
                uuid: client_id,
                username: DEFAULT_CLIENT_USERNAME.to_string(),
            },
        )
        .await?;
    events.end(Step::Done).await;

    info!(host = %request.server_ip, server_id, "provisioning complete");

    Ok(Provisioned {
        client_id,
        public_key: keys.public_key,
    })
}

/// Pushes events to the consumer. A consumer that went away is not an
/// error: the workflow finishes (and releases its session) regardless.
struct EventSink {
    tx: mpsc::Sender<ProvisionEvent>,
}

impl EventSink {
    async fn begin(&self, step: Step) {
        self.emit(ProvisionEvent::Status {
            step,
            phase: Phase::InProgress,
        })
        .await;
    }

    async fn end(&self, step: Step) {
        self.emit(ProvisionEvent::Status {
            step,
            phase: Phase::Done,
        })
        .await;
    }

    async fn emit(&self, event: ProvisionEvent) {
        let _ = self.tx.send(event).await;
    }
}
