//! Remote provisioning orchestrator
//!
//! Turns a bare host reachable over SSH into a working reality proxy:
//! install the daemon, generate key material, synthesize and upload the
//! configuration, restart, then prove the listener actually completes a
//! TLS handshake before anything is persisted locally. Progress is pushed
//! as a stream of events; any step failure ends the run with a single
//! terminal event and the SSH session is released on every exit path.
//!
//! The orchestrator is injected with its three collaborators — command
//! channel connector, registry, verification probe — so the whole state
//! machine runs under test against in-memory fakes.

pub mod clients;
pub mod commands;
pub mod event;
pub mod orchestrator;
pub mod probe;
pub mod traffic;

pub use event::{Phase, ProvisionEvent, Step};
pub use orchestrator::{provision, ProvisioningRequest};
pub use probe::{Probe, TlsProbe};

use thiserror::Error;

use veil_registry::RegistryError;
use veil_ssh::ChannelError;
use veil_xray::{KeyExtractionError, QrEncodeError};

/// Username of the default credential issued with every provisioning run.
pub const DEFAULT_CLIENT_USERNAME: &str = "user1";

/// Provisioning errors; each maps to one terminal `error:*` event.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Keys(#[from] KeyExtractionError),

    #[error("Proxy verification failed. The server may not be reachable or is misconfigured.")]
    Verification,

    /// The host already carries a configuration and overwrite was not
    /// requested. Callers treat this as "needs confirmation", not as a
    /// transient failure.
    #[error("exists")]
    AlreadyProvisioned,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to encode configuration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to render QR code: {0}")]
    Qr(#[from] QrEncodeError),
}
