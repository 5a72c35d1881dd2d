//! HTTP server exposing policy-gated routes.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::header::{REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::http::{HeaderValue, Method, Uri};
use axum::routing::{any, get, MethodRouter};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::layer::with_rate_limit;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::rules::{ADMIN, API, AUTH, EXPORT, UPLOAD};
use crate::ratelimit::{PolicyRegistry, RateLimitConfig, RateLimiter};

/// HTTP server for the rate limit gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared limiter for every gated route
    limiter: RateLimiter,
    /// Named policies routes are gated with
    policies: PolicyRegistry,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, limiter: RateLimiter, policies: PolicyRegistry) -> Self {
        Self {
            addr,
            limiter,
            policies,
        }
    }

    /// Build the application router.
    ///
    /// `/health` is never rate limited. Every other route is gated by the
    /// policy of its endpoint class.
    pub fn router(&self) -> Result<Router> {
        let router = Router::new()
            .route("/health", get(health))
            .route("/api/auth/{action}", self.gated(AUTH)?)
            .route("/api/upload", self.gated(UPLOAD)?)
            .route("/api/admin/{resource}", self.gated(ADMIN)?)
            .route("/api/export", self.gated(EXPORT)?)
            .route("/api/evidence", self.gated(API)?)
            .route("/api/evidence/{id}", self.gated(API)?)
            .layer(SetResponseHeaderLayer::if_not_present(
                X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ))
            .layer(TraceLayer::new_for_http());

        Ok(router)
    }

    fn gated(&self, policy: &str) -> Result<MethodRouter> {
        let rule = self.policies.require(policy)?.clone();
        debug!(
            policy = %policy,
            max_requests = rule.max_requests,
            window_ms = rule.window_ms,
            "Gating route"
        );
        let config = RateLimitConfig::new(rule);
        Ok(any(accept).layer(with_rate_limit(self.limiter.clone(), config)))
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router()?;
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}

/// Periodically drop expired counters so idle keys do not accumulate.
pub fn spawn_sweeper(limiter: RateLimiter, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        info!(interval = ?every, "Counter sweeper started");

        loop {
            interval.tick().await;
            match limiter.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Purged expired counters"),
                Err(e) => warn!(error = %e, "Counter sweep failed"),
            }
        }
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn accept(method: Method, uri: Uri) -> Json<Value> {
    Json(json!({
        "status": "accepted",
        "method": method.as_str(),
        "path": uri.path()
    }))
}
