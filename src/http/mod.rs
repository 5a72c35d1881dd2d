//! HTTP integration: the gating layer, quota headers and the server.

mod layer;
pub mod response;
mod server;

pub use layer::{with_rate_limit, RateLimitLayer, RateLimitService};
pub use response::{build_rejection_response, decorate_response};
pub use server::{spawn_sweeper, HttpServer};
