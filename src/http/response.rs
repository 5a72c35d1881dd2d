//! Quota headers and the over-limit response.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ratelimit::RateLimitDecision;

/// Maximum requests per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Unix time in seconds at which the current window ends.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody<'a> {
    pub error: &'a str,
    pub message: &'a str,
    pub retry_after: u64,
}

/// Build the 429 response for a rejected request.
pub fn build_rejection_response(
    decision: &RateLimitDecision,
    now: DateTime<Utc>,
    message: &str,
) -> Response {
    let retry_after = decision.retry_after_secs(now);
    let body = RejectionBody {
        error: "Too Many Requests",
        message,
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    for (name, value) in quota_headers(decision) {
        headers.insert(name, value);
    }
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Attach quota headers to an admitted response, keeping any the handler set.
pub fn decorate_response(response: &mut Response, decision: &RateLimitDecision) {
    add_missing_headers(response.headers_mut(), decision);
}

fn add_missing_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    for (name, value) in quota_headers(decision) {
        headers.entry(name).or_insert(value);
    }
}

fn quota_headers(decision: &RateLimitDecision) -> [(HeaderName, HeaderValue); 3] {
    [
        (X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit)),
        (X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining)),
        (X_RATELIMIT_RESET, HeaderValue::from(decision.reset_unix_secs())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    fn rejected() -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset_time: at(2500),
            total_hits: 4,
        }
    }

    #[tokio::test]
    async fn test_rejection_response() {
        let response = build_rejection_response(&rejected(), at(0), "Slow down");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "3");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000002");
        assert_eq!(headers[RETRY_AFTER], "3");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["message"], "Slow down");
        assert_eq!(body["retryAfter"], 3);
    }

    #[test]
    fn test_retry_after_never_negative() {
        let response = build_rejection_response(&rejected(), at(10_000), "late");
        assert_eq!(response.headers()[RETRY_AFTER], "0");
    }

    #[test]
    fn test_decorate_keeps_handler_headers() {
        let mut response = (
            [(X_RATELIMIT_LIMIT, HeaderValue::from_static("custom"))],
            "ok",
        )
            .into_response();
        let decision = RateLimitDecision {
            allowed: true,
            limit: 10,
            remaining: 9,
            reset_time: at(60_000),
            total_hits: 1,
        };

        decorate_response(&mut response, &decision);

        let headers = response.headers();
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "custom");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "9");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000060");
        assert!(headers.get(RETRY_AFTER).is_none());
    }
}
