//! Management HTTP API
//!
//! Thin boundary over the registry and the provisioning orchestrator:
//! request validation, serialization, and the streamed progress feed for
//! `POST /api/proxy`.

pub mod handlers;
pub mod models;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use veil_provision::probe::{Probe, TlsProbe};
use veil_registry::SqlRegistry;
use veil_ssh::{Connector, SshConnector};

/// Application state shared across handlers
pub struct AppState {
    pub registry: SqlRegistry,
    pub connector: Arc<dyn Connector>,
    pub probe: Arc<dyn Probe>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Veil API",
        version = "0.1.0",
        description = "REST API for provisioning and managing reality proxies",
        contact(name = "Veil Team", email = "team@veil.dev")
    ),
    paths(
        handlers::health_check,
        handlers::create_proxy,
        handlers::list_servers,
        handlers::get_server,
        handlers::delete_server,
        handlers::list_clients,
        handlers::add_client,
        handlers::delete_client,
        handlers::get_client,
        handlers::get_traffic,
        handlers::reset_traffic,
    ),
    components(
        schemas(
            models::CreateProxyRequest,
            models::ServerSummary,
            models::ServerDetails,
            models::ClientSummary,
            models::ClientDetails,
            models::AddClientRequest,
            models::AddClientResponse,
            models::MessageResponse,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "provisioning", description = "Remote provisioning workflow"),
        (name = "servers", description = "Provisioned server management"),
        (name = "clients", description = "Credential management"),
        (name = "traffic", description = "Per-user traffic counters"),
        (name = "system", description = "System health endpoints")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS (for development)
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".parse().expect("valid default address"),
            enable_cors: true,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a server backed by real SSH sessions and the TLS probe.
    pub fn new(config: ApiServerConfig, registry: SqlRegistry) -> Self {
        Self::with_components(
            config,
            registry,
            Arc::new(SshConnector),
            Arc::new(TlsProbe::new()),
        )
    }

    /// Create a server with injected collaborators (used by tests).
    pub fn with_components(
        config: ApiServerConfig,
        registry: SqlRegistry,
        connector: Arc<dyn Connector>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        let state = Arc::new(AppState {
            registry,
            connector,
            probe,
        });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route("/api/proxy", post(handlers::create_proxy))
            .route("/api/servers", get(handlers::list_servers))
            .route(
                "/api/servers/{id}",
                get(handlers::get_server).delete(handlers::delete_server),
            )
            .route(
                "/api/servers/{id}/clients",
                get(handlers::list_clients).post(handlers::add_client),
            )
            .route(
                "/api/servers/{id}/clients/{client_id}",
                delete(handlers::delete_client),
            )
            .route("/api/servers/{id}/traffic", get(handlers::get_traffic))
            .route(
                "/api/servers/{id}/traffic/reset",
                post(handlers::reset_traffic),
            )
            .route("/api/clients/{id}", get(handlers::get_client))
            .with_state(self.state.clone());

        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
            .merge(api_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind and serve until the process is stopped.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.config.bind_addr;
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{addr}");
        info!("Swagger UI available at http://{addr}/swagger-ui");

        axum::serve(listener, router).await
    }
}
