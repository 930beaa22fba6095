//! `GatewayServer`: Axum HTTP + WebSocket server assembly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use bunch_core::DomainEvent;
use bunch_core::ids::ConnectionId;
use bunch_proto::CloseCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::dispatch::{EventDispatcher, event_channel};
use crate::health::{self, HealthResponse};
use crate::metrics::MetricsHandle;
use crate::registry::ConnectionRegistry;
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;
use crate::store::ChatStore;
use crate::subscriptions::SubscriptionTable;

/// Shared state accessible from Axum handlers and the session loop.
pub struct AppState {
    /// Live connections, backed by the subscription table.
    pub registry: Arc<ConnectionRegistry>,
    /// Channel into the dispatcher task.
    pub events: mpsc::Sender<DomainEvent>,
    /// Handshake token verifier.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Chat persistence.
    pub store: Arc<dyn ChatStore>,
    /// Server configuration.
    pub config: ServerConfig,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, if metrics are installed.
    pub metrics: Option<MetricsHandle>,
}

/// Query parameters of the `/ws` handshake.
#[derive(Debug, Deserialize)]
struct HandshakeParams {
    token: Option<String>,
    connection_id: Option<String>,
}

/// The bunch realtime gateway.
pub struct GatewayServer {
    state: Arc<AppState>,
    dispatcher: Option<JoinHandle<()>>,
}

impl GatewayServer {
    /// Create a server and spawn its dispatcher task.
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        Self::with_metrics(config, verifier, store, None)
    }

    /// Like [`GatewayServer::new`] with a Prometheus handle for `/metrics`.
    pub fn with_metrics(
        config: ServerConfig,
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn ChatStore>,
        metrics: Option<MetricsHandle>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SubscriptionTable::new())));
        let (events, event_rx) = event_channel();
        let dispatcher = tokio::spawn(EventDispatcher::new(registry.clone()).run(event_rx));

        let state = Arc::new(AppState {
            registry,
            events,
            verifier,
            store,
            config,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        });
        Self {
            state,
            dispatcher: Some(dispatcher),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Shared state, for wiring and tests.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Bind and serve until shutdown is requested.
    ///
    /// Returns the bound address (useful with `port = 0`) and the serve
    /// task handle.
    pub async fn listen(&mut self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "gateway listening");

        let router = self.router();
        let state = self.state.clone();
        let token = state.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                token.cancelled().await;
                // Ask live connections to close cleanly before the listener goes
                state.registry.close_all(CloseCode::Normal).await;
            });
            if let Err(err) = serve.await {
                tracing::error!(error = %err, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop the dispatcher task. Called on drop as well.
    pub fn abort_dispatcher(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.abort_dispatcher();
    }
}

/// GET /ws: upgrade and hand the socket to the session loop.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let connection_id = params.connection_id.map(ConnectionId::from);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, params.token, connection_id, state))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let connections = state.registry.len().await;
    let subscriptions = state.registry.subscriptions().len();
    Json(health::health_check(
        state.start_time,
        connections,
        subscriptions,
    ))
}

/// GET /metrics: Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
