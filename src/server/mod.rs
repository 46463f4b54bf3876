//! Gateway HTTP server: tenant routing, reload, health, and lifecycle.
//!
//! Tenant endpoints are resolved per request against the current spec
//! catalog snapshot, so a reload applies atomically to newly incoming
//! requests without rebuilding the router.

use crate::config::GatewayConfig;
use crate::dispatch::{Dispatcher, McpDispatcher};
use crate::error::{Error, Result};
use crate::session::{
    run_cleanup_loop, SessionIdentity, SessionStore, StatefulIdentity, StatelessIdentity,
};
use crate::spec::SpecCatalog;
use crate::store::SpecStore;
use crate::transport::catalog::CatalogQuery;
use crate::transport::{handle_delete, handle_get, handle_post, handle_tools_catalog};
use crate::upstream::UpstreamClient;
use axum::extract::{Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Bound on the shutdown wait for the cleanup loop.
const CLEANUP_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Request body cap for the MCP endpoint.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub catalog: Arc<SpecCatalog>,
    pub sessions: Arc<SessionStore>,
    pub identity: Arc<dyn SessionIdentity>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub store: Arc<dyn SpecStore>,
}

/// Main gateway server owning the shared state and the cleanup loop.
pub struct GatewayServer {
    state: AppState,
    cleanup_cancel: CancellationToken,
    cleanup_handle: tokio::task::JoinHandle<()>,
}

impl GatewayServer {
    /// Initialize the gateway: load the active specs, build the upstream
    /// client and dispatcher, and start the session cleanup loop.
    pub async fn new(config: GatewayConfig, store: Arc<dyn SpecStore>) -> Result<Self> {
        info!("Initializing openapi-mcp gateway");

        let catalog = Arc::new(SpecCatalog::new());
        let loaded = catalog.load_from(store.as_ref()).await?;
        info!(specs = loaded.len(), "Spec catalog loaded");

        let upstream = UpstreamClient::new(&config.upstream)?;
        let dispatcher: Arc<dyn Dispatcher> =
            Arc::new(McpDispatcher::new(upstream, config.debug_auth));

        let identity: Arc<dyn SessionIdentity> = if config.mcp.stateless {
            Arc::new(StatelessIdentity)
        } else {
            Arc::new(StatefulIdentity)
        };

        let sessions = Arc::new(SessionStore::new());
        let cleanup_cancel = CancellationToken::new();
        let cleanup_handle = tokio::spawn(run_cleanup_loop(
            sessions.clone(),
            config.mcp.cleanup_interval(),
            cleanup_cancel.clone(),
        ));

        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                catalog,
                sessions,
                identity,
                dispatcher,
                store,
            },
            cleanup_cancel,
            cleanup_handle,
        })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn build_router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Start serving and block until shutdown (Ctrl-C). The cleanup loop
    /// gets a bounded wait to confirm exit before the call returns.
    pub async fn run(self) -> Result<()> {
        let router = self.build_router();

        let addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        )
        .parse::<SocketAddr>()
        .map_err(|e| Error::Validation(format!("Invalid address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind: {}", e)))?;

        info!("Gateway listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down gateway gracefully...");
            })
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        self.cleanup_cancel.cancel();
        if tokio::time::timeout(CLEANUP_SHUTDOWN_WAIT, self.cleanup_handle)
            .await
            .is_err()
        {
            warn!("Cleanup loop did not confirm exit within the shutdown window");
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Build the Axum router over shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/reload", post(handle_reload))
        .fallback(route_tenant)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "openapi-mcp"}))
}

/// Rebuild the spec catalog from the store. The swap is atomic from the
/// perspective of newly incoming requests.
async fn handle_reload(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.catalog.load_from(state.store.as_ref()).await {
        Ok(reloaded) => {
            info!(specs = reloaded.len(), "Catalog reloaded");
            Json(json!({"success": true, "reloaded_apis": reloaded}))
        },
        Err(e) => {
            warn!(error = %e, "Catalog reload failed");
            Json(json!({
                "success": false,
                "reloaded_apis": [],
                "error": e.to_string(),
            }))
        },
    }
}

/// Resolve `/{tenant}...` paths against the current catalog snapshot.
async fn route_tenant(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    if segments.len() < 2 || segments[0].is_empty() {
        return Error::NotFound(format!("no route for {}", path)).into_response();
    }

    let tenant = segments[0];
    let Some(spec) = state.catalog.get(tenant) else {
        return Error::NotFound(format!("unknown endpoint: /{}", tenant)).into_response();
    };

    let rest = format!("/{}", segments[1..].join("/"));

    if rest == state.config.mcp.base_path {
        return match parts.method {
            Method::POST => {
                let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return (StatusCode::BAD_REQUEST, format!("failed to read body: {}", e))
                            .into_response();
                    },
                };
                handle_post(state, spec, parts.headers, bytes).await
            },
            Method::GET => handle_get(state, spec, parts.headers).await,
            Method::DELETE => handle_delete(state, parts.headers).await,
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    // The catalog façade answers any GET whose final segment is `tools`.
    if parts.method == Method::GET && segments.last() == Some(&"tools") {
        let query = match Query::<CatalogQuery>::try_from_uri(&parts.uri) {
            Ok(Query(query)) => query,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };
        return handle_tools_catalog(&spec, &query, &parts.headers);
    }

    Error::NotFound(format!("no route for {}", path)).into_response()
}
