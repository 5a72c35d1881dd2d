//! Rate limit key derivation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use sha2::{Digest, Sha256};

/// Sentinel used when a client attribute cannot be determined.
pub const UNKNOWN: &str = "unknown";

/// Headers consulted for the client IP, highest priority first.
pub const CLIENT_IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Hex characters of the user-agent digest kept in a key.
const USER_AGENT_DIGEST_LEN: usize = 16;

/// A function mapping a request to the key its quota is tracked under.
pub type KeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Derive the default key: client IP, normalized path and user-agent digest.
///
/// Two clients, or one client on two routes, never share a key. The digest
/// keeps key length bounded regardless of the user-agent size.
pub fn default_key<B>(request: &Request<B>) -> String {
    let ip = client_ip(request);
    let path = normalize_path(request.uri().path());
    let agent = user_agent_digest(request.headers());
    format!("{}:{}:{}", ip, path, agent)
}

/// Resolve the best-effort client IP for a request.
///
/// Proxy headers win over the peer address recorded by the server, and
/// `"unknown"` is returned when neither is available.
pub fn client_ip<B>(request: &Request<B>) -> String {
    if let Some(ip) = ip_from_headers(request.headers()) {
        return ip;
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn ip_from_headers(headers: &HeaderMap) -> Option<String> {
    CLIENT_IP_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?;
        // X-Forwarded-For lists every hop; the first one is the client.
        let first = value.split(',').next()?.trim();
        if first.is_empty() {
            None
        } else {
            Some(first.to_string())
        }
    })
}

/// Collapse repeated slashes and drop a trailing slash, keeping `/` for the root.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Bounded digest of the `user-agent` header, or `"unknown"` when absent.
pub fn user_agent_digest(headers: &HeaderMap) -> String {
    let agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match agent {
        Some(agent) => {
            let digest = format!("{:x}", Sha256::digest(agent.as_bytes()));
            digest[..USER_AGENT_DIGEST_LEN].to_string()
        }
        None => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn request(path: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let req = request(
            "/api/items",
            &[
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("x-real-ip", "198.51.100.2"),
            ],
        );
        assert_eq!(client_ip(&req), "203.0.113.7");
    }

    #[test]
    fn test_ip_header_priority() {
        let req = request(
            "/",
            &[("cf-connecting-ip", "192.0.2.9"), ("x-real-ip", "198.51.100.2")],
        );
        assert_eq!(client_ip(&req), "198.51.100.2");

        let req = request("/", &[("cf-connecting-ip", "192.0.2.9")]);
        assert_eq!(client_ip(&req), "192.0.2.9");
    }

    #[test]
    fn test_empty_forwarded_for_falls_through() {
        let req = request("/", &[("x-forwarded-for", " "), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&req), "198.51.100.2");
    }

    #[test]
    fn test_connect_info_fallback() {
        let mut req = request("/", &[]);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4000);
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&req), "127.0.0.1");
    }

    #[test]
    fn test_missing_headers_degrade_to_unknown() {
        let req = request("/api/items", &[]);
        assert_eq!(default_key(&req), "unknown:/api/items:unknown");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/api//items/"), "/api/items");
        assert_eq!(normalize_path("/api/items"), "/api/items");
    }

    #[test]
    fn test_user_agent_digest_is_bounded() {
        let long_agent = "Mozilla/5.0 ".repeat(500);
        let req = request("/", &[("user-agent", long_agent.as_str())]);
        let digest = user_agent_digest(req.headers());
        assert_eq!(digest.len(), USER_AGENT_DIGEST_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_clients_and_routes_do_not_collide() {
        let a = request("/api/items", &[("x-real-ip", "10.0.0.1"), ("user-agent", "curl")]);
        let b = request("/api/items", &[("x-real-ip", "10.0.0.2"), ("user-agent", "curl")]);
        let c = request("/api/other", &[("x-real-ip", "10.0.0.1"), ("user-agent", "curl")]);
        let d = request("/api/items", &[("x-real-ip", "10.0.0.1"), ("user-agent", "wget")]);

        let keys = [default_key(&a), default_key(&b), default_key(&c), default_key(&d)];
        for (i, left) in keys.iter().enumerate() {
            for right in &keys[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn test_trailing_slash_shares_key() {
        let a = request("/api/items/", &[("x-real-ip", "10.0.0.1")]);
        let b = request("/api/items", &[("x-real-ip", "10.0.0.1")]);
        assert_eq!(default_key(&a), default_key(&b));
    }
}
