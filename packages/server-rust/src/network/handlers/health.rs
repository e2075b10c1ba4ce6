//! Health, liveness and readiness probes, served on both listeners.

use std::collections::HashSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Detailed health as JSON.
///
/// Always 200; the `state` field carries the actual health so monitoring
/// can tell "up but draining" from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.registration.store().snapshot();
    let services: HashSet<_> = snapshot.instances.iter().map(|r| &r.service_name).collect();
    let routable = state.router.table().current().instance_count();

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "instances": snapshot.len(),
        "routable": routable,
        "services": services.len(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness: 200 while the process can answer at all.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness: 200 only in the `Ready` state, 503 while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.is_accepting() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use waypoint_core::{InstanceAddress, InstanceId, InstanceStatus, Metadata, ServiceName};

    use super::*;
    use crate::network::handlers::test_support;
    use crate::registry::InstanceRegistration;

    fn register(state: &AppState, service: &str, id: &str) {
        state.registration.register(InstanceRegistration {
            service_name: ServiceName::parse(service).unwrap(),
            instance_id: InstanceId::parse(id).unwrap(),
            address: InstanceAddress::new("127.0.0.1", 9000).unwrap(),
            metadata: Metadata::new(),
        });
    }

    #[tokio::test]
    async fn reports_registry_counts() {
        let state = test_support::state();
        register(&state, "products", "p-1");
        register(&state, "products", "p-2");
        register(&state, "users", "u-1");
        state
            .registration
            .set_status(
                &ServiceName::parse("users").unwrap(),
                &InstanceId::parse("u-1").unwrap(),
                InstanceStatus::Down,
            )
            .unwrap();

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health["state"], "ready");
        assert_eq!(health["instances"], 3);
        assert_eq!(health["routable"], 2);
        assert_eq!(health["services"], 2);
        assert_eq!(health["in_flight"], 0);
        assert!(health["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn reports_in_flight_and_draining() {
        let state = test_support::state();
        let _guard = state.shutdown.in_flight_guard();
        state.shutdown.trigger_shutdown();

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health["state"], "draining");
        assert_eq!(health["in_flight"], 1);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_support::state();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
