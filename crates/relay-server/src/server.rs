use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_core::engine::ReplyEngine;
use relay_core::errors::RelayError;
use relay_core::ids::{ConnectionId, Identity};
use relay_core::settings::{IdentityMode, RelayPolicy, RelaySettings};
use relay_session::bridge::SessionBridge;
use relay_session::grant::{GrantCapabilities, GrantIssuer};
use relay_session::transport::SessionTransport;

use crate::channel::WsChannel;
use crate::registry::ConnectionRegistry;
use crate::relay::{RelayOptions, RelaySession};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_send_queue: 256,
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<GrantIssuer>,
    pub transport: Arc<dyn SessionTransport>,
    pub transport_host: Arc<str>,
    pub engine: Arc<dyn ReplyEngine>,
    pub policy: Arc<RelayPolicy>,
    pub registry: Arc<ConnectionRegistry>,
    pub max_send_queue: usize,
}

impl AppState {
    /// Build state from settings. Missing credentials are kept as an error
    /// and reported per connection.
    pub fn new(
        settings: &RelaySettings,
        transport: Arc<dyn SessionTransport>,
        engine: Arc<dyn ReplyEngine>,
    ) -> Self {
        let issuer = GrantIssuer::new(
            settings.transport.credentials(),
            Duration::from_secs(settings.transport.grant_ttl_secs),
        );
        if !issuer.has_credentials() {
            tracing::warn!("transport credentials are not set; session joins will fail");
        }
        Self {
            issuer: Arc::new(issuer),
            transport,
            transport_host: settings.transport.host.as_str().into(),
            engine,
            policy: Arc::new(settings.relay.clone()),
            registry: Arc::new(ConnectionRegistry::new()),
            max_send_queue: settings.server.max_send_queue,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/token", get(token_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %err, "server stopped with error");
        }
    });

    tracing::info!(port = local_addr.port(), "relay server started");

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the listener to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.server.await {
            tracing::warn!(error = %err, "server task ended abnormally");
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    let identity = state.policy.identity_for_connection();
    let room = state.policy.room.clone();
    let _guard = state
        .registry
        .register(connection_id.clone(), identity.clone(), &room);
    tracing::info!(connection_id = %connection_id, identity = %identity, room = %room, "client connected");

    let mut bridge = SessionBridge::new(
        Arc::clone(&state.issuer),
        Arc::clone(&state.transport),
        Arc::clone(&state.engine),
        state.transport_host.as_ref(),
    );
    if state.policy.identity_mode == IdentityMode::PerConnection {
        bridge = bridge.with_agent_prefix(state.policy.identity_prefix.clone());
    }

    let channel = WsChannel::new(socket, connection_id.clone(), state.max_send_queue);
    let options = RelayOptions {
        room,
        identity,
        forward_session_replies_to_client: state.policy.forward_session_replies_to_client,
    };
    let mut relay = RelaySession::new(
        connection_id.clone(),
        channel,
        bridge,
        Arc::clone(&state.engine),
        options,
    );

    let outcome = relay.run().await;
    tracing::info!(connection_id = %connection_id, outcome = ?outcome, "relay finished");
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub identity: Option<String>,
    pub room: Option<String>,
}

/// Issue a grant for an arbitrary participant. Returns `{"token": ...}`.
async fn token_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> impl IntoResponse {
    let Some(identity) = query.identity.filter(|s| !s.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "identity is required" })),
        );
    };
    let room = query
        .room
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.policy.room.clone());

    match state
        .issuer
        .issue(&Identity::new(identity), &room, GrantCapabilities::default())
    {
        Ok(grant) => (StatusCode::OK, Json(json!({ "token": grant.into_string() }))),
        Err(err) => {
            tracing::warn!(error = %err, kind = err.error_kind(), "token request failed");
            let status = match err {
                RelayError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": err.close_reason() })))
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "active_connections": state.registry.count(),
    }))
}
