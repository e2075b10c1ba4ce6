//! JSON payloads exchanged over the registration protocol and the gateway
//! admin endpoints.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the wire keys
//! match the configuration surface (`serviceName`, `instanceId`, ...).

pub mod gateway;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use gateway::{RouteView, RoutingTableView};
pub use registry::{
    InstanceView, RegisterRequest, RegistryView, ServiceView, StatusUpdateRequest,
};

/// Machine-readable error codes carried in [`ErrorBody::code`].
pub mod error_codes {
    pub const MUST_REREGISTER: &str = "must_reregister";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const NO_ROUTE: &str = "no_route";
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const SHUTTING_DOWN: &str = "shutting_down";
}

/// Body of every non-2xx response produced by the registry or the gateway
/// itself (upstream error responses are passed through untouched).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description.
    pub error: String,
    /// Stable code from [`error_codes`].
    pub code: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
        }
    }
}
