//! Listeners, HTTP middleware, handlers and shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use module::{gateway_router, registry_router, BoundPorts, GatewayServer};
pub use shutdown::*;
