use waypoint_core::ServiceName;

use super::upstream::UpstreamError;

/// Why a request could not be served by an upstream instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// No configured prefix matches the request path.
    #[error("no route matches path {path}")]
    NoRoute { path: String },

    /// The service has no routable instance. No network call was made.
    #[error("service {service} has no available instances")]
    ServiceUnavailable { service: ServiceName },

    /// Every attempt within the retry budget failed.
    #[error("all {attempts} attempt(s) to reach service {service} failed: {last_error}")]
    UpstreamUnavailable {
        service: ServiceName,
        attempts: usize,
        last_error: UpstreamError,
    },
}
