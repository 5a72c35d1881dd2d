//! Gatekeeper - HTTP Rate Limit Gate
//!
//! This crate implements a fixed-window rate limiter for HTTP services. Each
//! request is mapped to a key (client IP, route and user-agent digest by
//! default), counted against a named policy, and either passed to the wrapped
//! handler with quota headers attached or answered with `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
