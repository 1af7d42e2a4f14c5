// src/gateway/mod.rs
mod route;
mod router;

pub use route::{cache_key, RouteHandler};
pub use router::{route_remainder, Gateway, GatewayContext};
