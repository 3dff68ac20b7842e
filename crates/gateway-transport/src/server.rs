//! HTTP transport server using Axum.
//!
//! One `POST /mcp` endpoint carries JSON-RPC requests from every tenant.
//! Credentials and routing are resolved before a session is opened; each
//! dispatch runs in its own task so a panicking handler cannot take the
//! process down, and a disconnecting client does not cancel upstream work
//! already in flight.

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gateway_protocol::{
    GatewayErrorCode, HandlerResult, RouteDefaults, RouteParams, RpcError, RpcErrorCode,
    RpcRequest, RpcResponse, Tenant, credential, route,
};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::body::close_after_body;
use crate::session::{CloseReason, SessionCounter, SessionObserver, TransportSession};

/// Trait implemented by the dispatch layer to handle resolved requests.
/// The transport calls this once per JSON-RPC request, inside a dedicated task.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a JSON-RPC request on behalf of `tenant`.
    fn handle_request(
        &self,
        tenant: Tenant,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> impl std::future::Future<Output = HandlerResult> + Send;

    /// Whether the handler can serve requests. A handler that is not ready
    /// is a process misconfiguration and every request gets a 500.
    fn is_ready(&self) -> bool {
        true
    }

    /// Names reported by the health endpoint.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Process-wide routing fallbacks
    pub route_defaults: RouteDefaults,
    /// Enable permissive CORS
    pub enable_cors: bool,
    /// Maximum accepted request body in bytes
    pub max_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            hostname: "127.0.0.1".into(),
            route_defaults: RouteDefaults::default(),
            enable_cors: false,
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared state for the transport server.
struct AppState<H: RequestHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    sessions: Arc<SessionCounter>,
    started_at: DateTime<Utc>,
}

/// The transport server: accepts requests and hands them to the handler.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
    sessions: Arc<SessionCounter>,
}

impl TransportServer {
    /// Start the transport server with the given request handler.
    pub async fn start<H: RequestHandler>(
        config: TransportConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        Self::start_with_observer(config, Arc::new(handler), None).await
    }

    /// Start the transport server with an extra session observer.
    /// Accepts `Arc<H>` so the handler can be shared with other subsystems.
    pub async fn start_with_observer<H: RequestHandler>(
        config: TransportConfig,
        handler: Arc<H>,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let sessions = Arc::new(SessionCounter::new(observer));

        let state = Arc::new(AppState {
            handler,
            config: config.clone(),
            sessions: sessions.clone(),
            started_at: Utc::now(),
        });

        let mut app = Router::new()
            .route("/mcp", post(mcp_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .layer(DefaultBodyLimit::max(config.max_body_bytes))
            .with_state(state);
        if config.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let listener = tokio::net::TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let actual_port = listener.local_addr()?.port();

        info!("Gateway listening on http://{}:{}/mcp", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
            sessions,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Session counters (open and total).
    pub fn sessions(&self) -> &SessionCounter {
        &self.sessions
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Gateway transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters of the gateway endpoint.
///
/// Read from raw pairs so a malformed query never short-circuits the
/// credential check. A repeated parameter is dropped and reported.
#[derive(Debug, Default)]
struct EndpointQuery {
    vault_id: Option<String>,
    vault_url: Option<String>,
    account_id: Option<String>,
    workspace_id: Option<String>,
    api_key: Option<String>,
    problem: Option<String>,
}

impl EndpointQuery {
    fn from_extracted(query: Result<Query<Vec<(String, String)>>, QueryRejection>) -> Self {
        match query {
            Ok(Query(pairs)) => Self::from_pairs(pairs),
            Err(rejection) => Self {
                problem: Some(rejection.body_text()),
                ..Self::default()
            },
        }
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        let mut duplicated: Vec<&'static str> = Vec::new();
        for (key, value) in pairs {
            let (name, slot) = match key.as_str() {
                "vaultId" => ("vaultId", &mut query.vault_id),
                "vaultUrl" => ("vaultUrl", &mut query.vault_url),
                "accountId" => ("accountId", &mut query.account_id),
                "workspaceId" => ("workspaceId", &mut query.workspace_id),
                "apiKey" => ("apiKey", &mut query.api_key),
                _ => continue,
            };
            if duplicated.contains(&name) {
                continue;
            }
            if slot.take().is_some() {
                duplicated.push(name);
                query
                    .problem
                    .get_or_insert_with(|| format!("Duplicate query parameter: {name}"));
            } else {
                *slot = Some(value);
            }
        }
        query
    }

    fn route_params(&mut self) -> RouteParams {
        RouteParams {
            vault_id: self.vault_id.take(),
            vault_url: self.vault_url.take(),
            account_id: self.account_id.take(),
            workspace_id: self.workspace_id.take(),
        }
    }
}

async fn mcp_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    body: Bytes,
) -> Response {
    let mut query = EndpointQuery::from_extracted(query);

    if !state.handler.is_ready() {
        error!("Request rejected: handler is not ready");
        return reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            RpcError::rejected(RpcErrorCode::ServerNotInitialized, "Server is not initialized"),
        );
    }

    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let credential = match credential::resolve(authorization, query.api_key.as_deref()) {
        Ok(credential) => credential,
        Err(e) => {
            warn!("Request rejected: {e}");
            return reject(
                StatusCode::UNAUTHORIZED,
                RpcError::rejected(GatewayErrorCode::AuthenticationFailed, e.to_string()),
            );
        }
    };

    if let Some(problem) = query.problem.take() {
        warn!("Request rejected: {problem}");
        return reject(
            StatusCode::BAD_REQUEST,
            RpcError::rejected(GatewayErrorCode::InvalidConfiguration, problem),
        );
    }

    let route = match route::resolve(query.route_params(), &state.config.route_defaults) {
        Ok(route) => route,
        Err(e) => {
            warn!("Request rejected: {e}");
            return reject(
                StatusCode::BAD_REQUEST,
                RpcError::rejected(GatewayErrorCode::InvalidConfiguration, e.to_string()),
            );
        }
    };

    serve_session(state, Tenant::new(credential, route), body).await
}

async fn health_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    let status = if state.handler.is_ready() { "ok" } else { "not_ready" };
    Json(json!({
        "status": status,
        "activeSessions": state.sessions.active(),
        "totalSessions": state.sessions.total(),
        "tools": state.handler.capabilities(),
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Drive one request through its session: activate, dispatch, respond.
/// The session closes once the response body has been written.
async fn serve_session<H: RequestHandler>(
    state: Arc<AppState<H>>,
    tenant: Tenant,
    body: Bytes,
) -> Response {
    let observer: Arc<dyn SessionObserver> = state.sessions.clone();
    let mut session = TransportSession::open(Some(observer));

    let (correlation, parsed) = match RpcRequest::from_slice(&body) {
        Ok(request) => (request.id.clone(), Ok(request)),
        Err((id, err)) => (id, Err(err)),
    };

    if let Err(e) = session.activate(correlation) {
        error!("{e}");
        session.close(CloseReason::Failed);
        return reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            RpcError::rejected(RpcErrorCode::InternalError, "Session could not be activated"),
        );
    }

    let request = match parsed {
        Ok(request) => request,
        Err(err) => {
            debug!(session_id = session.id(), "Malformed request body: {}", err.message);
            let response = session.respond(Err(err));
            return close_after_body((StatusCode::OK, Json(response)), session, CloseReason::Failed);
        }
    };

    let span = info_span!(
        "request",
        session_id = session.id(),
        method = %request.method,
        vault_id = tenant.route.vault_id(),
        cluster_id = tenant.route.cluster_id(),
        credential = %tenant.credential.fingerprint(),
    );

    let is_notification = request.is_notification();
    let RpcRequest { method, params, .. } = request;
    let handler = state.handler.clone();

    let task = tokio::spawn(
        async move { handler.handle_request(tenant, &method, params).await }
            .instrument(span.clone()),
    );

    let result = match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            span.in_scope(|| error!("Handler panicked"));
            Err(RpcError::internal("Internal error while handling request"))
        }
        Err(e) => {
            span.in_scope(|| error!("Dispatch task did not complete: {e}"));
            session.close(CloseReason::Failed);
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                RpcError::rejected(RpcErrorCode::InternalError, "Request dispatch was cancelled"),
            );
        }
    };

    let reason = if result.is_ok() { CloseReason::Completed } else { CloseReason::Failed };

    if is_notification {
        return close_after_body(StatusCode::ACCEPTED, session, reason);
    }

    let response = session.respond(result);
    close_after_body((StatusCode::OK, Json(response)), session, reason)
}

fn reject(status: StatusCode, error: RpcError) -> Response {
    (status, Json(RpcResponse::error(None, error))).into_response()
}
