//! `RelayServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::EngineId;
use relay_protocol::EngineVersion;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::events::EventRegistry;
use crate::health::{self, HealthResponse};
use crate::middleware::MiddlewareChain;
use crate::namespace::{BroadcastManager, NamespaceRegistry};
use crate::shutdown::ShutdownCoordinator;
use crate::socket::{SessionContext, run_ws_session};

/// Path of the engine endpoint.
pub const ENGINE_PATH: &str = "/socket.io/";

/// Engine error codes returned on a refused handshake.
pub mod engine_errors {
    /// The `transport` query value is not `websocket`.
    pub const TRANSPORT_UNKNOWN: u8 = 0;
    /// A `sid` was supplied; sessions cannot be resumed.
    pub const UNKNOWN_SID: u8 = 1;
    /// The request is not a valid `WebSocket` upgrade.
    pub const BAD_REQUEST: u8 = 3;
    /// The `EIO` query value is not supported.
    pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 5;
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dependencies handed to every session.
    pub session: Arc<SessionContext>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Engine connection slots.
    pub connections: ConnectionLimit,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// Caps concurrent engine connections.
///
/// A slot is reserved before the upgrade and held by the session until it
/// ends, so concurrent handshakes cannot overshoot the limit.
#[derive(Clone, Debug)]
pub struct ConnectionLimit {
    slots: Arc<Semaphore>,
    max: usize,
}

impl ConnectionLimit {
    /// Limit of `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))),
            max,
        }
    }

    /// Reserve a slot, or `None` when all are taken.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Slots still free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Configured maximum.
    pub fn max(&self) -> usize {
        self.max
    }
}

/// Query string of an engine handshake.
#[derive(Debug, Default, Deserialize)]
pub struct EngineQuery {
    /// Engine revision.
    #[serde(rename = "EIO")]
    pub eio: Option<String>,
    /// Requested transport.
    pub transport: Option<String>,
    /// Session id of an existing connection.
    pub sid: Option<String>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    events: Arc<EventRegistry>,
    middleware: Arc<MiddlewareChain>,
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    connections: ConnectionLimit,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server with the default middleware chain.
    pub fn new(config: ServerConfig, events: EventRegistry, metrics: PrometheusHandle) -> Self {
        let namespaces = NamespaceRegistry::new(config.namespaces.clone(), config.allow_dynamic_namespaces);
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout()));
        let connections = ConnectionLimit::new(config.max_connections);
        Self {
            config: Arc::new(config),
            events: Arc::new(events),
            middleware: Arc::new(MiddlewareChain::default_chain()),
            broadcast: Arc::new(BroadcastManager::new(Arc::new(namespaces))),
            shutdown,
            connections,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Replace the middleware chain.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = Arc::new(middleware);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: Arc::new(SessionContext {
                config: Arc::clone(&self.config),
                broadcast: Arc::clone(&self.broadcast),
                events: Arc::clone(&self.events),
                middleware: Arc::clone(&self.middleware),
            }),
            shutdown: Arc::clone(&self.shutdown),
            connections: self.connections.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/socket.io", get(engine_handler))
            .route(ENGINE_PATH, get(engine_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    /// The task finishes once shutdown is requested and sessions drained or
    /// the drain timeout passed.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(&addr, e))?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let shutdown = Arc::clone(&self.shutdown);

        info!(%local_addr, namespaces = ?self.config.namespaces, "relay server listening");

        let handle = tokio::spawn(async move {
            let signal = token.clone();
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
            {
                error!(error = %e, "server error");
            }

            let drained = shutdown.drain().await;
            info!(drained, "relay server stopped");
        });

        Ok((local_addr, handle))
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

    /// Get the event registry.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let broadcast = &state.session.broadcast;
    let connections = broadcast.connection_count().await;
    let sockets = broadcast.namespaces().socket_count().await;
    Json(health::health_check(state.start_time, connections, sockets))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(&state.metrics),
    )
}

/// Engine handshake error body.
fn engine_error(status: StatusCode, code: u8, message: &str) -> Response {
    debug!(code, message, "engine handshake refused");
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

/// GET /socket.io/: validate the handshake and upgrade.
async fn engine_handler(
    State(state): State<AppState>,
    Query(query): Query<EngineQuery>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let config = &state.session.config;

    if query.transport.as_deref() != Some("websocket") {
        return engine_error(
            StatusCode::BAD_REQUEST,
            engine_errors::TRANSPORT_UNKNOWN,
            "Transport unknown",
        );
    }

    let version = match EngineVersion::from_query(query.eio.as_deref()) {
        Ok(EngineVersion::V3) if !config.allow_eio3 => None,
        Ok(version) => Some(version),
        Err(_) => None,
    };
    let Some(version) = version else {
        return engine_error(
            StatusCode::BAD_REQUEST,
            engine_errors::UNSUPPORTED_PROTOCOL_VERSION,
            "Unsupported protocol version",
        );
    };

    if query.sid.is_some() {
        return engine_error(
            StatusCode::BAD_REQUEST,
            engine_errors::UNKNOWN_SID,
            "Session ID unknown",
        );
    }

    let Ok(ws) = upgrade else {
        return engine_error(StatusCode::BAD_REQUEST, engine_errors::BAD_REQUEST, "Bad request");
    };

    let Some(slot) = state.connections.try_reserve() else {
        warn!(max = state.connections.max(), "connection limit reached, refusing upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let engine_id = EngineId::new();
    let ctx = Arc::clone(&state.session);
    let token = state.shutdown.child_token();
    let shutdown = Arc::clone(&state.shutdown);
    ws.max_message_size(config.max_payload)
        .on_upgrade(move |socket| {
            shutdown.track_session(async move {
                run_ws_session(socket, engine_id, version, ctx, token).await;
                drop(slot);
            })
        })
        .into_response()
}
