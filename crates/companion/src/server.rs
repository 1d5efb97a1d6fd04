//! HTTPS API server
//!
//! # Routes
//!
//! | Method | Path                       | Auth   |
//! |--------|----------------------------|--------|
//! | GET    | `/api/v1/health`           | none   |
//! | GET    | `/api/v1/cert-fingerprint` | none   |
//! | POST   | `/api/v1/shutdown`         | bearer |
//! | POST   | `/api/v1/reboot`           | bearer |
//! | POST   | `/api/v1/sleep`            | bearer |
//! | POST   | `/api/v1/hibernate`        | bearer |
//!
//! # Middleware
//!
//! Outermost first: request trace, security headers, panic recovery, request timeout,
//! rate limit. Bearer auth wraps the power routes only. Every route, including the
//! 404 fallback, passes through the rate limiter before anything else is checked.
//! Timeouts (408), unknown paths (404) and wrong methods (405) answer with the same
//! JSON envelope as every other error.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    AUTHORIZATION, CACHE_CONTROL, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{BoxError, Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde::Serialize;
use thiserror::Error;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wolite_core::{routes, tls, ApiResponse, Fingerprint, FingerprintData, PowerAction};

use crate::auth::TokenStore;
use crate::cert::Identity;
use crate::commands::CommandExecutor;
use crate::ratelimit::RateLimiterStore;

/// Seconds between an accepted power request and the OS command
pub const POWER_DELAY_SECS: i64 = 3;

/// Server-side bound on a single request, independent of the client
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenStore,
    pub limiter: RateLimiterStore,
    pub executor: Arc<CommandExecutor>,
    /// Computed once from the loaded certificate
    pub fingerprint: Fingerprint,
    pub power_delay_secs: i64,
}

impl AppState {
    pub fn new(tokens: TokenStore, executor: Arc<CommandExecutor>, fingerprint: Fingerprint) -> Self {
        Self {
            tokens,
            limiter: RateLimiterStore::new(),
            executor,
            fingerprint,
            power_delay_secs: POWER_DELAY_SECS,
        }
    }
}

/// The companion's TLS-terminated API
pub struct CompanionServer {
    state: AppState,
    tls: RustlsConfig,
}

impl CompanionServer {
    pub fn new(identity: &Identity, state: AppState) -> Result<Self, ServerError> {
        Ok(Self {
            state,
            tls: tls_config(identity)?,
        })
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve on an already bound listener until `handle` is shut down
    pub async fn serve(self, listener: std::net::TcpListener, handle: Handle) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let app = self.router();

        info!(%addr, fingerprint = %self.state.fingerprint, "companion listening");

        axum_server::from_tcp_rustls(listener, self.tls)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        info!("companion stopped");
        Ok(())
    }
}

/// rustls server config for `identity`, TLS 1.2 and 1.3, HTTP/1.1 only
pub fn tls_config(identity: &Identity) -> Result<RustlsConfig, ServerError> {
    let mut config = rustls::ServerConfig::builder_with_provider(tls::provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(vec![identity.cert.clone()], identity.key.clone_key())?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

/// Full route table with middleware applied
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route(routes::HEALTH, get(health).fallback(method_not_allowed))
        .route(
            routes::CERT_FINGERPRINT,
            get(cert_fingerprint).fallback(method_not_allowed),
        );

    let protected = Router::new()
        .route(routes::SHUTDOWN, power_route(PowerAction::Shutdown))
        .route(routes::REBOOT, power_route(PowerAction::Reboot))
        .route(routes::SLEEP, power_route(PowerAction::Sleep))
        .route(routes::HIBERNATE, power_route(PowerAction::Hibernate))
        .route_layer(middleware::from_fn_with_state(state.clone(), bearer_auth));

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .fallback(not_found);

    with_middleware(app, &state).with_state(state)
}

fn with_middleware(app: Router<AppState>, state: &AppState) -> Router<AppState> {
    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(security_headers))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(HandleErrorLayer::new(handle_timeout))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(middleware::from_fn_with_state(
                state.limiter.clone(),
                rate_limit,
            )),
    )
}

fn respond<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    respond::<()>(status, ApiResponse::error(status.as_u16(), message))
}

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000"),
    );
    resp
}

async fn rate_limit(State(limiter): State<RateLimiterStore>, req: Request, next: Next) -> Response {
    if !limiter.check() {
        warn!(ip = ?peer_addr(&req), path = %req.uri().path(), "rate limit exceeded");
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
    }
    next.run(req).await
}

/// Missing header, wrong scheme and wrong token all produce the same 401
async fn bearer_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let authorized = match bearer_token(req.headers()) {
        Some(token) => state.tokens.verify(token).await,
        None => false,
    };

    if !authorized {
        warn!(ip = ?peer_addr(&req), path = %req.uri().path(), "unauthorized request");
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    next.run(req).await
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = detail, "request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

async fn handle_timeout(err: BoxError) -> Response {
    if err.is::<Elapsed>() {
        warn!(timeout_secs = REQUEST_TIMEOUT.as_secs(), "request timed out");
        error_response(StatusCode::REQUEST_TIMEOUT, "Request Timeout")
    } else {
        error!(error = %err, "unhandled middleware error");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

async fn health() -> Response {
    respond::<()>(StatusCode::OK, ApiResponse::ok("OK", None))
}

async fn cert_fingerprint(State(state): State<AppState>) -> Response {
    respond(
        StatusCode::OK,
        ApiResponse::ok(
            "certificate fingerprint",
            Some(FingerprintData {
                fingerprint: state.fingerprint,
            }),
        ),
    )
}

fn power_route(action: PowerAction) -> MethodRouter<AppState> {
    post(move |State(state): State<AppState>| power(state, action)).fallback(method_not_allowed)
}

async fn power(state: AppState, action: PowerAction) -> Response {
    let delay = state.power_delay_secs;
    let prepared = match state.executor.prepare(action, delay) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(%action, error = %e, "command validation failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "command validation failed");
        }
    };

    info!(%action, delay_secs = delay, program = prepared.program(), "power command accepted");

    // Past this point failures can only be logged; the host may already be going down.
    tokio::spawn(async move {
        if let Err(e) = prepared.execute().await {
            error!(%action, error = %e, "power command failed");
        }
    });

    respond::<()>(
        StatusCode::OK,
        ApiResponse::ok(
            format!(
                "{} command validated, executing in {} seconds",
                action.label(),
                delay
            ),
            None,
        ),
    )
}
