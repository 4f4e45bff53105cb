//! `MurmurServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::health::{self, HealthResponse};
use crate::protocol::ConnectionId;
use crate::registry::SessionRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use crate::websocket::broadcast::{BroadcastManager, ConnectionSet};
use crate::websocket::session::{SessionConfig, run_ws_session};
use crate::welcome::WelcomeSource;

/// Bundled browser client.
const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event router shared by every session.
    pub dispatcher: Arc<Dispatcher>,
    /// Live connections for fan-out.
    pub broadcast: Arc<BroadcastManager>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Per-connection transport parameters.
    pub session: SessionConfig,
    /// Largest inbound message accepted on `/ws`.
    pub max_message_size: usize,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The relay server.
pub struct MurmurServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl MurmurServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        welcome: Arc<dyn WelcomeSource>,
        metrics: PrometheusHandle,
    ) -> Self {
        let broadcast = Arc::new(BroadcastManager::new());
        let connections: Arc<dyn ConnectionSet> = broadcast.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(SessionRegistry::new()),
            connections,
            welcome,
        ));
        Self {
            config,
            dispatcher,
            broadcast,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            broadcast: self.broadcast.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            session: self.config.session(),
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(index_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "murmur relay listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        Ok((addr, handle))
    }

    /// Stop accepting, close sessions, and drain pending welcome notices.
    ///
    /// Each phase is bounded by the configured shutdown timeout.
    pub async fn stop(&self, server_task: JoinHandle<()>) {
        let timeout = self.config.shutdown_timeout();
        if let ShutdownOutcome::TimedOut { .. } = self
            .shutdown
            .shutdown_and_wait(vec![server_task], timeout)
            .await
        {
            warn!("listener did not stop in time");
        }

        let pending = self.dispatcher.pending_count();
        if tokio::time::timeout(timeout, self.dispatcher.drain())
            .await
            .is_err()
        {
            warn!(pending, "welcome notices still pending at shutdown");
        }
        info!("murmur relay stopped");
    }

    /// Get the event dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Get the broadcast manager.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /
async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let AppState {
        dispatcher,
        broadcast,
        shutdown,
        session,
        max_message_size,
        ..
    } = state;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(
                socket,
                ConnectionId::new(),
                dispatcher,
                broadcast,
                session,
                shutdown.token(),
            )
            .await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.broadcast.connection_count();
    let identified = state.dispatcher.registry().len();
    Json(health::health_check(state.start_time, connections, identified))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
