//! Gateway ingress: every request on the gateway listener that is not a
//! health probe is forwarded to an instance of the service its path maps to.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use http_body_util::LengthLimitError;

use super::{ApiError, AppState};
use crate::routing::ProxyResponse;

/// Fallback handler of the gateway listener.
///
/// Refused with 503 `shutting_down` unless the server is `Ready`. The
/// request counts as in flight until its response is produced; if the
/// client disconnects, the upstream call is dropped with this future.
pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    if !state.shutdown.is_accepting() {
        return Err(ApiError::ShuttingDown);
    }
    let _guard = state.shutdown.in_flight_guard();

    let limit = state.config.max_body_bytes;
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, limit).await.map_err(|err| {
        if is_length_limit(&err) {
            ApiError::PayloadTooLarge { limit }
        } else {
            ApiError::BadRequest(format!("failed to read request body: {err}"))
        }
    })?;

    let response = state
        .router
        .dispatch(
            parts.method,
            parts.uri.path(),
            parts.uri.query(),
            parts.headers,
            body,
        )
        .await?;
    Ok(into_response(response))
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn into_response(upstream: ProxyResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

#[cfg(test)]
mod tests {
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;
    use waypoint_core::messages::ErrorBody;
    use waypoint_core::{InstanceAddress, InstanceId, Metadata, ServiceName};

    use super::*;
    use crate::network::handlers::test_support;
    use crate::network::module::gateway_router;
    use crate::registry::InstanceRegistration;

    fn register(state: &AppState, id: &str, port: u16) {
        state.registration.register(InstanceRegistration {
            service_name: ServiceName::parse("product-service").unwrap(),
            instance_id: InstanceId::parse(id).unwrap(),
            address: InstanceAddress::new("127.0.0.1", port).unwrap(),
            metadata: Metadata::new(),
        });
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn forwards_with_prefix_stripped() {
        let state = test_support::state();
        register(&state, "a", 9001);
        let app = gateway_router(state);

        let (status, headers, body) = call(
            &app,
            Request::post("/products/42?expand=true")
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "POST /42?expand=true payload");
        assert_eq!(headers["x-upstream-port"], "9001");
    }

    #[tokio::test]
    async fn round_robins_across_instances() {
        let state = test_support::state();
        register(&state, "a", 9001);
        register(&state, "b", 9002);
        let app = gateway_router(state);

        let mut ports = Vec::new();
        for _ in 0..4 {
            let (_, headers, _) =
                call(&app, Request::get("/products").body(Body::empty()).unwrap()).await;
            ports.push(headers["x-upstream-port"].to_str().unwrap().to_string());
        }
        assert_eq!(ports, vec!["9001", "9002", "9001", "9002"]);
    }

    #[tokio::test]
    async fn unknown_prefix_and_empty_service_are_errors() {
        let state = test_support::state();
        let app = gateway_router(state);

        let (status, _, body) =
            call(&app, Request::get("/users/1").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(serde_json::from_str::<ErrorBody>(&body).unwrap().code, "no_route");

        let (status, _, body) =
            call(&app, Request::get("/products/1").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            serde_json::from_str::<ErrorBody>(&body).unwrap().code,
            "service_unavailable"
        );
    }

    #[tokio::test]
    async fn refuses_new_requests_while_draining() {
        let state = test_support::state();
        register(&state, "a", 9001);
        state.shutdown.trigger_shutdown();
        let app = gateway_router(state);

        let (status, _, body) =
            call(&app, Request::get("/products").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            serde_json::from_str::<ErrorBody>(&body).unwrap().code,
            "shutting_down"
        );
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected_before_forwarding() {
        let mut state = test_support::state();
        register(&state, "a", 9001);
        state.config = std::sync::Arc::new(crate::network::NetworkConfig {
            max_body_bytes: 4,
            ..crate::network::NetworkConfig::default()
        });
        let app = gateway_router(state);

        let (status, _, body) = call(
            &app,
            Request::post("/products").body(Body::from("0123456789")).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            serde_json::from_str::<ErrorBody>(&body).unwrap().code,
            "payload_too_large"
        );
    }

    #[tokio::test]
    async fn health_routes_are_not_proxied() {
        let state = test_support::state();
        let app = gateway_router(state);
        let (status, _, _) =
            call(&app, Request::get("/health/live").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }
}
