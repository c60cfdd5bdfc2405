//! HTTP Server Implementation
//!
//! Uses Axum to accept requests and hand them to the handlers modules have
//! registered in the router.

use crate::context::RequestContext;
use crate::error::{HttpError, RuntimeError, RuntimeResult};
use crate::router::{Router as RouteTable, SharedRouter};
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use host_bridge::{METHOD_UNKNOWN, method_bit};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Paths answered with 204 regardless of what is registered.
pub const NO_CONTENT_PATHS: &[&str] = &["/favicon.ico", "/robots.txt"];

/// Extra time given to the server task after it was aborted.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub listen: SocketAddr,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Request body size limit (bytes)
    pub body_limit: usize,
    /// How long in-flight requests may drain on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout: Duration::from_secs(10),
            body_limit: 16 * 1024 * 1024, // 16MB
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Application state shared across requests
#[derive(Clone)]
pub struct AppState {
    router: SharedRouter,
}

impl AppState {
    pub fn new(router: SharedRouter) -> Self {
        Self { router }
    }
}

/// Run every handler the request resolves to. `None` means not found.
///
/// Blocking: handlers are foreign code with no time bound.
pub fn dispatch(routes: &RouteTable, method: &str, path: &str) -> Option<RequestContext> {
    let bit = method_bit(method);
    if bit == METHOD_UNKNOWN {
        return None;
    }
    let handlers = routes.lookup(path)?.handlers_for(bit);
    if handlers.is_empty() {
        return None;
    }

    let mut ctx = RequestContext::new(method, path);
    for handler in handlers {
        handler.invoke(&mut ctx);
    }
    Some(ctx)
}

/// Bind `config.listen` and serve until `cancel` fires.
pub async fn start_server(router: SharedRouter, config: ServerConfig, cancel: CancellationToken) -> RuntimeResult<()> {
    let listener = TcpListener::bind(config.listen).await.map_err(|e| {
        RuntimeError::server_with_source(format!("Failed to bind to {}", config.listen), e.into())
    })?;
    serve(listener, router, &config, cancel).await
}

/// Serve on an already bound listener until `cancel` fires.
///
/// Shutdown drains in-flight requests for `shutdown_timeout`, then aborts
/// the server task and waits a little longer for it to wind down.
pub async fn serve(
    listener: TcpListener,
    router: SharedRouter,
    config: &ServerConfig,
    cancel: CancellationToken,
) -> RuntimeResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Server listening on http://{}", addr);
    }
    if router.is_empty() {
        warn!("No routes registered yet; requests will 404 until a module registers one");
    }

    let app = build_router(AppState::new(router), config);
    let graceful = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        graceful.cancelled().await;
    });
    let mut task = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut task => return server_result(joined),
        _ = cancel.cancelled() => {}
    }

    info!("Shutting down server");
    match tokio::time::timeout(config.shutdown_timeout, &mut task).await {
        Ok(joined) => {
            info!("Server shut down gracefully");
            server_result(joined)
        }
        Err(_) => {
            warn!(
                deadline_ms = config.shutdown_timeout.as_millis() as u64,
                "Graceful shutdown deadline exceeded, closing listener"
            );
            task.abort();
            if tokio::time::timeout(ABORT_GRACE, task).await.is_err() {
                warn!("Server task did not finish after abort");
            }
            Ok(())
        }
    }
}

fn server_result(joined: Result<std::io::Result<()>, tokio::task::JoinError>) -> RuntimeResult<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RuntimeError::server_with_source("Server error", e.into())),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(RuntimeError::server_with_source("Server task failed", e.into())),
    }
}

/// Build the Axum router with middleware
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        // Catch-all handler that routes to modules
        .fallback(handle_request)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.body_limit))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Handle all incoming requests
async fn handle_request(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let path = uri.path().to_string();
    if NO_CONTENT_PATHS.contains(&path.as_str()) {
        return StatusCode::NO_CONTENT.into_response();
    }

    debug!("Incoming request: {} {}", method, path);

    let router = state.router.clone();
    let method_name = method.as_str().to_string();
    let joined = tokio::task::spawn_blocking(move || dispatch(&router, &method_name, &path)).await;

    match joined {
        Ok(Some(ctx)) => context_response(ctx),
        Ok(None) => {
            debug!("No route found for {} {}", method, uri.path());
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
        Err(e) => {
            error!("Handler error: {}", e);
            error_response(HttpError::internal_error("Handler failed"))
        }
    }
}

/// Turn what the handlers wrote into an HTTP response.
fn context_response(ctx: RequestContext) -> Response {
    let status = StatusCode::from_u16(ctx.status).unwrap_or_else(|_| {
        warn!(status = ctx.status, "Handler set an invalid status code");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut response = Response::new(Body::from(ctx.body));
    *response.status_mut() = status;
    for (name, value) in ctx.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}

fn error_response(err: HttpError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        err.to_json().to_string(),
    )
        .into_response()
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received termination signal, shutting down...");
        }
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}
