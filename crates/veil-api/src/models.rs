use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Request to provision a proxy on a remote host
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateProxyRequest {
    /// Address of the remote host
    pub server_ip: String,
    /// SSH login user
    pub ssh_user: String,
    /// SSH login password
    pub ssh_password: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Domain the listener masquerades as
    pub mask_domain: String,
    /// Display name for the proxy
    pub proxy_name: String,
    /// Tear down an existing install first
    #[serde(default)]
    pub overwrite: bool,
}

fn default_ssh_port() -> u16 {
    22
}

/// Provisioned server, as listed
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServerSummary {
    pub id: i32,
    pub server_ip: String,
    pub mask_domain: String,
    pub proxy_name: String,
}

/// Single server details
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServerDetails {
    pub id: i32,
    pub proxy_name: String,
}

/// Issued credential, as listed
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClientSummary {
    pub id: i32,
    pub uuid: Uuid,
    pub username: String,
}

/// Credential details with regenerated connection material
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClientDetails {
    pub uuid: Uuid,
    pub vless_link: String,
    /// Base64-encoded PNG
    pub qr_code: String,
}

/// Request to issue a new credential
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddClientRequest {
    pub client_username: String,
}

/// Response after issuing a credential
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AddClientResponse {
    pub message: String,
    pub uuid: Uuid,
}

/// Generic confirmation message
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
