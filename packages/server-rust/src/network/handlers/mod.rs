//! HTTP handlers and the shared state they extract.
//!
//! - [`registration`]: the registry API (`/registry/...`)
//! - [`proxy`]: the gateway fallback that forwards to instances
//! - [`admin`]: `/gateway/routes` and `/metrics`
//! - [`health`]: health, liveness and readiness probes

pub mod admin;
pub mod error;
pub mod health;
pub mod proxy;
pub mod registration;

pub use admin::{metrics_handler, routes_handler};
pub use error::ApiError;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use proxy::proxy_handler;
pub use registration::{
    deregister_handler, heartbeat_handler, list_handler, list_service_handler, register_handler,
    status_handler,
};

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use super::{NetworkConfig, ShutdownController};
use crate::registry::RegistrationService;
use crate::routing::GatewayRouter;

/// State shared by both listeners. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub registration: RegistrationService,
    pub router: Arc<GatewayRouter>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Present when a Prometheus recorder was installed.
    pub metrics: Option<PrometheusHandle>,
    pub start_time: Instant,
}
