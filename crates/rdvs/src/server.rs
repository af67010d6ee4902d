use crate::admission::admit;
use crate::config::ServerConfig;
use crate::connection::handle_socket;
use crate::error::RdvsError;
use crate::registry::SessionRegistry;
use crate::sweeper;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Body returned for plain HTTP requests that are neither upgrades nor
/// health checks.
pub const INFO_BODY: &str =
    "rdvs: ephemeral WebRTC signaling relay. Connect with a WebSocket to exchange offers, answers and ICE candidates.\n";

/// Shared state for the relay server.
pub struct ServerState {
    /// Live sessions, shared by connection handlers and the sweeper.
    pub registry: Arc<SessionRegistry>,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Per-IP connection counter for enforcing connection limits.
    pub ip_connections: DashMap<IpAddr, usize>,
    /// Number of open signaling connections.
    pub active_connections: AtomicUsize,
}

impl ServerState {
    /// Fresh state with an empty registry.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            config,
            ip_connections: DashMap::new(),
            active_connections: AtomicUsize::new(0),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

/// HTTP routes: `/health`, and a fallback that upgrades WebSocket requests
/// and answers everything else with [`INFO_BODY`].
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(upgrade_or_info)
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.len(),
    })
}

async fn upgrade_or_info(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(ws) = ws else {
        return INFO_BODY.into_response();
    };

    let slot = match admit(&state, peer_addr.ip()) {
        Ok(slot) => slot,
        Err(rejection) => {
            tracing::debug!(%peer_addr, "refusing upgrade: {}", rejection);
            return rejection.into_response();
        }
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            if let Err(e) = handle_socket(socket, state, slot).await {
                tracing::debug!("connection from {} closed: {}", peer_addr, e);
            }
        })
}

/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RdvsError> {
    run_with_shutdown(listener, state, std::future::pending()).await
}

/// Serve until `shutdown` resolves, then stop the expiry sweeper.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run_with_shutdown<F>(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: F,
) -> Result<(), RdvsError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!("server listening on {}", local_addr);

    let (stop_tx, stop_rx) = watch::channel(());
    let sweeper = sweeper::spawn(
        Arc::clone(&state.registry),
        state.config.sweep_interval,
        state.config.session_ttl,
        stop_rx,
    );

    let app = router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    drop(stop_tx);
    if let Err(e) = sweeper.await {
        warn!("sweeper task failed: {}", e);
    }

    info!("server shut down");
    result.map_err(RdvsError::Io)
}
