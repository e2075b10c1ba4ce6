//! Operational endpoints on the registry listener.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use waypoint_core::messages::RoutingTableView;

use super::AppState;

/// `GET /gateway/routes`: configured routes, routable instances, suspects.
pub async fn routes_handler(State(state): State<AppState>) -> Json<RoutingTableView> {
    Json(state.router.view())
}

/// `GET /metrics`: Prometheus text format. 404 when no recorder is installed.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
