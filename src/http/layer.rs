//! Tower layer that gates requests through the rate limiter.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::warn;

use super::response::{build_rejection_response, decorate_response};
use crate::ratelimit::{RateLimitConfig, RateLimiter};

/// Wrap a handler or service with a rate limit policy.
///
/// ```rust,ignore
/// let limiter = RateLimiter::in_memory();
/// let app = Router::new().route(
///     "/api/upload",
///     post(upload).layer(with_rate_limit(limiter, RateLimitConfig::per_window(60_000, 10))),
/// );
/// ```
pub fn with_rate_limit(limiter: RateLimiter, config: impl Into<RateLimitConfig>) -> RateLimitLayer {
    RateLimitLayer::new(limiter, config.into())
}

/// Layer applying one rate limit policy.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
    config: Arc<RateLimitConfig>,
}

impl RateLimitLayer {
    /// Create a layer checking requests against `config` in `limiter`.
    pub fn new(limiter: RateLimiter, config: RateLimitConfig) -> Self {
        Self {
            limiter,
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// Service produced by `RateLimitLayer`.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
    config: Arc<RateLimitConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let config = Arc::clone(&self.config);
        // Keep the service that was driven to readiness for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let key = config.key_for(&request);
            let now = limiter.now();

            let mut decision = match limiter.check(&key, &config, now).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(key = %key, error = %e, "Rate limit check failed, admitting request");
                    return inner.call(request).await;
                }
            };

            if !decision.allowed {
                warn!(
                    key = %key,
                    method = %request.method(),
                    path = %request.uri().path(),
                    hits = decision.total_hits,
                    limit = decision.limit,
                    "Rejecting request over rate limit"
                );
                return Ok(build_rejection_response(&decision, now, config.message()));
            }

            let result = inner.call(request).await;

            let status = result.as_ref().ok().map(|r| r.status().as_u16());
            if config.should_release(status) {
                match limiter.release(&key, &decision).await {
                    Ok(()) => decision = decision.released(),
                    Err(e) => warn!(key = %key, error = %e, "Failed to release rate limit hit"),
                }
            }

            result.map(|mut response| {
                decorate_response(&mut response, &decision);
                response
            })
        })
    }
}
