//! Mapping of domain errors to HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use waypoint_core::messages::{error_codes, ErrorBody};
use waypoint_core::ValidationError;

use crate::registry::RegistryError;
use crate::routing::RouteError;

/// Any error a handler can return. Rendered as `{ "error", "code" }` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Body rejected by axum's `DefaultBodyLimit` while extracting JSON.
    #[error("{0}")]
    BodyLimit(String),

    #[error("gateway is not accepting requests")]
    ShuttingDown,
}

impl ApiError {
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Registry(RegistryError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, error_codes::MUST_REREGISTER)
            }
            Self::Route(RouteError::NoRoute { .. }) => (StatusCode::NOT_FOUND, error_codes::NO_ROUTE),
            Self::Route(RouteError::ServiceUnavailable { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, error_codes::SERVICE_UNAVAILABLE)
            }
            Self::Route(RouteError::UpstreamUnavailable { .. }) => {
                (StatusCode::BAD_GATEWAY, error_codes::UPSTREAM_UNAVAILABLE)
            }
            Self::Validation(_) | Self::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, error_codes::INVALID_REQUEST)
            }
            Self::PayloadTooLarge { .. } | Self::BodyLimit(_) => {
                (StatusCode::PAYLOAD_TOO_LARGE, error_codes::PAYLOAD_TOO_LARGE)
            }
            Self::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, error_codes::SHUTTING_DOWN),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::BodyLimit(rejection.body_text())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        (status, Json(ErrorBody::new(code, self.to_string()))).into_response()
    }
}
