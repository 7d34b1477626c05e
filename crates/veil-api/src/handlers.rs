use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use veil_provision::traffic::TrafficTotals;
use veil_provision::{clients, commands, provision, traffic, ProvisioningRequest};
use veil_registry::{server, NewClient, ProxyRegistry};
use veil_ssh::{CommandChannel, SshTarget};
use veil_xray::{qr_png_base64, vless_link};

use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn ssh_target(server: &server::Model) -> SshTarget {
    SshTarget::new(
        server.server_ip.clone(),
        server.ssh_port as u16,
        server.ssh_user.clone(),
        server.ssh_password.clone(),
    )
}

async fn close_channel(mut channel: Box<dyn CommandChannel>) {
    if let Err(e) = channel.close().await {
        warn!(error = %e, "failed to close command channel");
    }
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Provision a proxy on a remote host, streaming progress tokens
#[utoipa::path(
    post,
    path = "/api/proxy",
    request_body = CreateProxyRequest,
    responses(
        (status = 200, description = "Stream of status/error/result tokens, one per line")
    ),
    tag = "provisioning"
)]
pub async fn create_proxy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateProxyRequest>,
) -> impl IntoResponse {
    debug!(host = %request.server_ip, overwrite = request.overwrite, "provisioning requested");

    let events = provision(
        ProvisioningRequest {
            server_ip: request.server_ip,
            ssh_user: request.ssh_user,
            ssh_password: request.ssh_password,
            ssh_port: request.ssh_port,
            mask_domain: request.mask_domain,
            proxy_name: request.proxy_name,
            overwrite: request.overwrite,
        },
        state.connector.clone(),
        Arc::new(state.registry.clone()),
        state.probe.clone(),
    );

    let body = Body::from_stream(
        events.map(|event| Ok::<_, std::convert::Infallible>(format!("{}\n", event.token()))),
    );

    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

/// List provisioned servers
#[utoipa::path(
    get,
    path = "/api/servers",
    responses(
        (status = 200, description = "List of servers", body = [ServerSummary]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "servers"
)]
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServerSummary>>, ApiError> {
    let servers = state
        .registry
        .list_servers()
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(
        servers
            .into_iter()
            .map(|s| ServerSummary {
                id: s.id,
                server_ip: s.server_ip,
                mask_domain: s.mask_domain,
                proxy_name: s.proxy_name,
            })
            .collect(),
    ))
}

/// Get one server
#[utoipa::path(
    get,
    path = "/api/servers/{id}",
    params(("id" = i32, Path, description = "Server ID")),
    responses(
        (status = 200, description = "Server details", body = ServerDetails),
        (status = 404, description = "Server not found", body = ErrorResponse)
    ),
    tag = "servers"
)]
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ServerDetails>, ApiError> {
    let server = state
        .registry
        .find_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Server not found"))?;

    Ok(Json(ServerDetails {
        id: server.id,
        proxy_name: server.proxy_name,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteServerQuery {
    #[serde(default)]
    pub cleanup: bool,
}

/// Delete a server, optionally tearing down the remote install first
#[utoipa::path(
    delete,
    path = "/api/servers/{id}",
    params(
        ("id" = i32, Path, description = "Server ID"),
        ("cleanup" = Option<bool>, Query, description = "Also stop the daemon and remove its files")
    ),
    responses(
        (status = 200, description = "Server deleted", body = MessageResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "servers"
)]
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(query): Query<DeleteServerQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let server = state
        .registry
        .find_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    // Remote teardown is best effort; row deletion proceeds regardless.
    if query.cleanup {
        if let Some(server) = &server {
            match state.connector.connect(&ssh_target(server)).await {
                Ok(mut channel) => {
                    match channel.exec(&commands::cleanup()).await {
                        Ok(output) if !output.success() => warn!(
                            host = %server.server_ip,
                            stderr = %output.stderr,
                            "server cleanup failed"
                        ),
                        Err(e) => warn!(host = %server.server_ip, error = %e, "server cleanup failed"),
                        Ok(_) => {}
                    }
                    close_channel(channel).await;
                }
                Err(e) => {
                    warn!(host = %server.server_ip, error = %e, "SSH connection failed during cleanup");
                }
            }
        }
    }

    state
        .registry
        .delete_clients_by_server_id(id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    state
        .registry
        .delete_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(MessageResponse {
        message: "Server deleted successfully".to_string(),
    }))
}

/// List a server's credentials
#[utoipa::path(
    get,
    path = "/api/servers/{id}/clients",
    params(("id" = i32, Path, description = "Server ID")),
    responses(
        (status = 200, description = "List of clients", body = [ClientSummary]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "clients"
)]
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<ClientSummary>>, ApiError> {
    let clients = state
        .registry
        .list_clients_by_server_id(id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(
        clients
            .into_iter()
            .map(|c| ClientSummary {
                id: c.id,
                uuid: c.uuid,
                username: c.username,
            })
            .collect(),
    ))
}

/// Issue a new credential on a live server
#[utoipa::path(
    post,
    path = "/api/servers/{id}/clients",
    params(("id" = i32, Path, description = "Server ID")),
    request_body = AddClientRequest,
    responses(
        (status = 200, description = "Client added", body = AddClientResponse),
        (status = 404, description = "Server not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "clients"
)]
pub async fn add_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(request): Json<AddClientRequest>,
) -> Result<Json<AddClientResponse>, ApiError> {
    let server = state
        .registry
        .find_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Server not found"))?;

    let mut channel = state
        .connector
        .connect(&ssh_target(&server))
        .await
        .map_err(|e| internal(format!("Failed to add client: {e}")))?;

    let added = clients::add_client(channel.as_mut(), &request.client_username).await;
    close_channel(channel).await;

    let uuid = added.map_err(|e| internal(format!("Failed to add client: {e}")))?;

    // Keep the local registry in lockstep with the remote client list.
    state
        .registry
        .insert_client(
            server.id,
            NewClient {
                uuid,
                username: request.client_username,
            },
        )
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(AddClientResponse {
        message: "Client added successfully".to_string(),
        uuid,
    }))
}

/// Revoke a credential
#[utoipa::path(
    delete,
    path = "/api/servers/{id}/clients/{client_id}",
    params(
        ("id" = i32, Path, description = "Server ID"),
        ("client_id" = i32, Path, description = "Client ID")
    ),
    responses(
        (status = 200, description = "Client deleted", body = MessageResponse),
        (status = 404, description = "Client or server not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "clients"
)]
pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path((id, client_id)): Path<(i32, i32)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let client = state
        .registry
        .find_client(id, client_id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Client not found"))?;

    let server = state
        .registry
        .find_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Server not found"))?;

    let mut channel = state
        .connector
        .connect(&ssh_target(&server))
        .await
        .map_err(|e| internal(format!("Failed to delete client: {e}")))?;

    let removed = clients::remove_client(channel.as_mut(), &client.username).await;
    close_channel(channel).await;

    removed.map_err(|e| internal(format!("Failed to delete client: {e}")))?;

    state
        .registry
        .delete_client(id, client_id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(MessageResponse {
        message: "Client deleted successfully".to_string(),
    }))
}

/// Get one credential with its regenerated share link
#[utoipa::path(
    get,
    path = "/api/clients/{id}",
    params(("id" = i32, Path, description = "Client ID")),
    responses(
        (status = 200, description = "Client details", body = ClientDetails),
        (status = 404, description = "Client not found", body = ErrorResponse)
    ),
    tag = "clients"
)]
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ClientDetails>, ApiError> {
    let (client, server) = state
        .registry
        .find_client_with_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Client not found"))?;

    let link = vless_link(
        &client.uuid,
        &server.server_ip,
        &server.mask_domain,
        &server.public_key,
        &server.proxy_name,
    );
    let qr_code = qr_png_base64(&link).map_err(|e| internal(e.to_string()))?;

    Ok(Json(ClientDetails {
        uuid: client.uuid,
        vless_link: link,
        qr_code,
    }))
}

/// Per-user traffic counters read from the live daemon
#[utoipa::path(
    get,
    path = "/api/servers/{id}/traffic",
    params(("id" = i32, Path, description = "Server ID")),
    responses(
        (status = 200, description = "Uplink/downlink bytes per username"),
        (status = 404, description = "Server not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "traffic"
)]
pub async fn get_traffic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<BTreeMap<String, TrafficTotals>>, ApiError> {
    let server = state
        .registry
        .find_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Server not found"))?;

    let usernames: Vec<String> = state
        .registry
        .list_clients_by_server_id(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .into_iter()
        .map(|c| c.username)
        .collect();

    if usernames.is_empty() {
        return Ok(Json(BTreeMap::new()));
    }

    let mut channel = state
        .connector
        .connect(&ssh_target(&server))
        .await
        .map_err(|e| internal(e.to_string()))?;

    let totals = traffic::fetch_traffic(channel.as_mut(), &usernames).await;
    close_channel(channel).await;

    Ok(Json(totals.map_err(|e| internal(e.to_string()))?))
}

/// Zero every user's traffic counters on the live daemon
#[utoipa::path(
    post,
    path = "/api/servers/{id}/traffic/reset",
    params(("id" = i32, Path, description = "Server ID")),
    responses(
        (status = 200, description = "Counters reset", body = MessageResponse),
        (status = 404, description = "Server not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "traffic"
)]
pub async fn reset_traffic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<MessageResponse>, ApiError> {
    let server = state
        .registry
        .find_server(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("Server not found"))?;

    let usernames: Vec<String> = state
        .registry
        .list_clients_by_server_id(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .into_iter()
        .map(|c| c.username)
        .collect();

    if !usernames.is_empty() {
        let mut channel = state
            .connector
            .connect(&ssh_target(&server))
            .await
            .map_err(|e| internal(e.to_string()))?;

        let reset = traffic::reset_traffic(channel.as_mut(), &usernames).await;
        close_channel(channel).await;
        reset.map_err(|e| internal(e.to_string()))?;
    }

    Ok(Json(MessageResponse {
        message: "Traffic counters reset".to_string(),
    }))
}
