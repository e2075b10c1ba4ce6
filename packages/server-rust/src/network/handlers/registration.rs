//! Registry API handlers, served on the registry listener only.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use waypoint_core::messages::{
    InstanceView, RegisterRequest, RegistryView, ServiceView, StatusUpdateRequest,
};
use waypoint_core::{InstanceId, ServiceName};

use super::{ApiError, AppState};
use crate::registry::{InstanceRegistration, RegisterOutcome};

fn parse_path(service_name: &str, instance_id: &str) -> Result<(ServiceName, InstanceId), ApiError> {
    Ok((ServiceName::parse(service_name)?, InstanceId::parse(instance_id)?))
}

/// `PUT /registry/{serviceName}/{instanceId}`
pub async fn register_handler(
    State(state): State<AppState>,
    Path((service_name, instance_id)): Path<(String, String)>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<InstanceView>, ApiError> {
    let (service_name, instance_id) = parse_path(&service_name, &instance_id)?;
    let Json(request) = payload?;
    let (outcome, view) = state.registration.register(InstanceRegistration {
        service_name,
        instance_id,
        address: request.address,
        metadata: request.metadata,
    });
    if outcome == RegisterOutcome::Renewed {
        tracing::debug!(
            service = %view.service_name,
            instance = %view.instance_id,
            "repeated registration treated as renewal"
        );
    }
    Ok(Json(view))
}

/// `PUT /registry/{serviceName}/{instanceId}/heartbeat`
pub async fn heartbeat_handler(
    State(state): State<AppState>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> Result<Json<InstanceView>, ApiError> {
    let (service_name, instance_id) = parse_path(&service_name, &instance_id)?;
    Ok(Json(state.registration.renew(&service_name, &instance_id)?))
}

/// `PUT /registry/{serviceName}/{instanceId}/status`
pub async fn status_handler(
    State(state): State<AppState>,
    Path((service_name, instance_id)): Path<(String, String)>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<InstanceView>, ApiError> {
    let (service_name, instance_id) = parse_path(&service_name, &instance_id)?;
    let Json(request) = payload?;
    let status = request.assignable_status()?;
    Ok(Json(state.registration.set_status(
        &service_name,
        &instance_id,
        status,
    )?))
}

/// `DELETE /registry/{serviceName}/{instanceId}`; 204 whether or not the
/// instance was registered.
pub async fn deregister_handler(
    State(state): State<AppState>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (service_name, instance_id) = parse_path(&service_name, &instance_id)?;
    if !state.registration.deregister(&service_name, &instance_id) {
        tracing::debug!(
            service = %service_name,
            instance = %instance_id,
            "deregistration of unknown instance ignored"
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /registry`
pub async fn list_handler(State(state): State<AppState>) -> Json<RegistryView> {
    Json(state.registration.list())
}

/// `GET /registry/{serviceName}`
pub async fn list_service_handler(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> Result<Json<ServiceView>, ApiError> {
    let service_name = ServiceName::parse(&service_name)?;
    Ok(Json(state.registration.list_service(&service_name)))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;
    use waypoint_core::messages::ErrorBody;
    use waypoint_core::InstanceStatus;

    use super::*;
    use crate::network::handlers::test_support;
    use crate::network::module::registry_router;

    fn app() -> (AppState, Router) {
        let state = test_support::state();
        (state.clone(), registry_router(state))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    const REGISTER: &str = r#"{"address":"10.0.0.5:8080","metadata":{"zone":"a"}}"#;

    #[tokio::test]
    async fn register_then_list() {
        let (_, app) = app();
        let (status, body) = send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        assert_eq!(status, StatusCode::OK);
        let view: InstanceView = json(&body);
        assert_eq!(view.service_name.as_str(), "PRODUCT-SERVICE");
        assert_eq!(view.status, InstanceStatus::Up);
        assert_eq!(view.metadata["zone"], "a");

        let (status, body) = send(&app, "GET", "/registry", None).await;
        assert_eq!(status, StatusCode::OK);
        let listing: RegistryView = json(&body);
        assert_eq!(listing.services.len(), 1);
        assert_eq!(listing.services[0].instances[0].instance_id.as_str(), "p-1");

        let (_, body) = send(&app, "GET", "/registry/product-service", None).await;
        let service: ServiceView = json(&body);
        assert_eq!(service.instances.len(), 1);

        let (status, body) = send(&app, "GET", "/registry/order-service", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json::<ServiceView>(&body).instances.is_empty());
    }

    #[tokio::test]
    async fn repeated_put_renews() {
        let (_, app) = app();
        send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        let (_, body) = send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        assert_eq!(json::<InstanceView>(&body).renewals, 1);
    }

    #[tokio::test]
    async fn put_after_marking_down_registers_afresh() {
        let (_, app) = app();
        send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        send(
            &app,
            "PUT",
            "/registry/product-service/p-1/status",
            Some(r#"{"status":"DOWN"}"#),
        )
        .await;

        let (status, body) = send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        assert_eq!(status, StatusCode::OK);
        let view: InstanceView = json(&body);
        assert_eq!(view.status, InstanceStatus::Up);
        assert_eq!(view.renewals, 0);
    }

    #[tokio::test]
    async fn oversized_registration_is_rejected() {
        let mut state = test_support::state();
        state.config = std::sync::Arc::new(crate::network::NetworkConfig {
            max_body_bytes: 16,
            ..crate::network::NetworkConfig::default()
        });
        let app = registry_router(state);

        let (status, body) = send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json::<ErrorBody>(&body).code, "payload_too_large");
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_instance_requires_reregistration() {
        let (_, app) = app();
        let (status, body) = send(&app, "PUT", "/registry/product-service/ghost/heartbeat", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json::<ErrorBody>(&body).code, "must_reregister");

        send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;
        let (status, body) = send(&app, "PUT", "/registry/product-service/p-1/heartbeat", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json::<InstanceView>(&body).renewals, 1);

        // Right id, wrong service.
        let (status, _) = send(&app, "PUT", "/registry/user-service/p-1/heartbeat", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_updates_accept_only_up_and_down() {
        let (state, app) = app();
        send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;

        let (status, body) = send(
            &app,
            "PUT",
            "/registry/product-service/p-1/status",
            Some(r#"{"status":"DOWN"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json::<InstanceView>(&body).status, InstanceStatus::Down);
        assert_eq!(state.router.table().current().instance_count(), 0);

        let (status, body) = send(
            &app,
            "PUT",
            "/registry/product-service/p-1/status",
            Some(r#"{"status":"EXPIRED"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json::<ErrorBody>(&body).code, "invalid_request");

        let (status, _) = send(
            &app,
            "PUT",
            "/registry/product-service/ghost/status",
            Some(r#"{"status":"UP"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deregister_is_always_no_content() {
        let (state, app) = app();
        send(&app, "PUT", "/registry/product-service/p-1", Some(REGISTER)).await;

        let (status, _) = send(&app, "DELETE", "/registry/product-service/p-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.registration.store().is_empty());

        let (status, _) = send(&app, "DELETE", "/registry/product-service/p-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_input_is_rejected() {
        let (_, app) = app();
        let (status, body) = send(
            &app,
            "PUT",
            "/registry/product-service/p-1",
            Some(r#"{"address":"no-port"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json::<ErrorBody>(&body).code, "invalid_request");

        let (status, _) = send(&app, "PUT", "/registry/bad%20name/p-1", Some(REGISTER)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
