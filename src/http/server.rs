//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum `Router` with a catch-all front controller
//! - Translate axum requests into a `ServerEnvironment`
//! - Dispatch and convert the envelope (or failure) back to axum
//! - Tag every response with a request ID
//! - Swap in reloaded route tables
//!
//! # Design Decisions
//! - Every path goes through one handler; routing is the dispatcher's job
//! - A failed dispatch with an empty body answers with the error text
//! - Reloaded configs are validated before their routes replace the table

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::validation::validate_config;
use crate::config::{AppConfig, ListenerConfig};
use crate::dispatch::Dispatcher;
use crate::error::DispatchFailure;
use crate::http::headers::Headers;
use crate::http::request::{RequestContext, ServerEnvironment};
use crate::http::response::ResponseEnvelope;
use crate::lifecycle::Shutdown;
use crate::routing::RouteTable;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP front end for the dispatcher.
pub struct HttpServer {
    router: Router,
    routes: Arc<ArcSwap<RouteTable>>,
}

impl HttpServer {
    pub fn new(listener: &ListenerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let routes = dispatcher.shared_routes();
        let router = Self::build_router(listener, AppState { dispatcher });
        Self { router, routes }
    }

    /// The configured axum router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[allow(deprecated)]
    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(front_controller))
            .route("/{*path}", any(front_controller))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires, applying route updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: &Shutdown,
        config_updates: Option<mpsc::UnboundedReceiver<AppConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.routes.load().len(),
            "HTTP server starting"
        );

        if let Some(updates) = config_updates {
            tokio::spawn(reload_routes(
                self.routes.clone(),
                updates,
                shutdown.subscribe(),
            ));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut shutdown_rx = shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Apply route updates until the channel closes or shutdown fires.
pub async fn reload_routes(
    routes: Arc<ArcSwap<RouteTable>>,
    mut updates: mpsc::UnboundedReceiver<AppConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    apply_routes(&routes, &config);
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Replace the route table with the routes of `config`.
///
/// Returns `false` and keeps the current table when the config is invalid.
pub fn apply_routes(routes: &ArcSwap<RouteTable>, config: &AppConfig) -> bool {
    if let Err(errors) = validate_config(config) {
        for error in &errors {
            tracing::error!(error = %error, "Rejected reloaded config");
        }
        return false;
    }

    match RouteTable::from_config(config.route_configs()) {
        Ok(table) => {
            tracing::info!(routes = table.len(), "Route table reloaded");
            routes.store(Arc::new(table));
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to rebuild routes, keeping current table");
            false
        }
    }
}

/// Front controller: every request lands here.
async fn front_controller(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = handle(state, request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

async fn handle(state: AppState, request: Request<Body>) -> Response {
    let env = match environment_from(request).await {
        Ok(env) => env,
        Err(response) => return response,
    };

    let context = match RequestContext::from_environment(&env, state.dispatcher.app(), None) {
        Ok(context) => context,
        Err(error) => {
            tracing::error!(error = %error, "Unable to build request context");
            return error_response(error.kind().status_code(), &error.to_string());
        }
    };

    match state.dispatcher.dispatch(context).await {
        Ok(envelope) => into_response(envelope),
        Err(DispatchFailure {
            error,
            mut response,
        }) => {
            if response.body().is_empty() {
                response.set_header("Content-Type", "text/plain; charset=utf-8");
                response.set_body(error.to_string());
            }
            into_response(response)
        }
    }
}

async fn environment_from(request: Request<Body>) -> Result<ServerEnvironment, Response> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read request body");
        error_response(400, "unable to read request body")
    })?;

    let mut headers = Headers::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.append(name.as_str(), value);
        }
    }

    let https = parts.uri.scheme_str() == Some("https")
        || headers
            .get("X-Forwarded-Proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let request_uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    Ok(ServerEnvironment {
        request_uri: Some(request_uri),
        method: Some(parts.method.as_str().to_string()),
        query_string: parts.uri.query().map(str::to_string),
        headers,
        body: body.to_vec(),
        remote_addr,
        https,
        ..ServerEnvironment::default()
    })
}

/// Convert an envelope to an axum response.
pub fn into_response(envelope: ResponseEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in envelope.header_lines() {
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(envelope.body().to_vec()))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Invalid response header");
            error_response(500, "invalid response header")
        })
}

fn error_response(status: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, message.to_string()).into_response()
}
