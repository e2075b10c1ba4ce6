//! Server assembly with deferred startup.
//!
//! `new()` wires the registry, routing table and router; `start()` binds
//! both listeners; `serve()` runs until the shutdown future resolves. The
//! split lets callers (tests, the binary) learn the bound ports and reach
//! the shared components before traffic flows.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::handlers::{
    deregister_handler, health_handler, heartbeat_handler, list_handler, list_service_handler,
    liveness_handler, metrics_handler, proxy_handler, readiness_handler, register_handler,
    routes_handler, status_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::config::{ConfigError, GatewayConfig};
use crate::registry::{ExpiryMonitor, LoggingObserver, RegistrationService, RegistryStore};
use crate::routing::{GatewayRouter, HttpUpstream, RoutingTableBuilder, Upstream};

/// Ports actually bound by [`GatewayServer::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundPorts {
    pub gateway: u16,
    pub registry: u16,
}

struct Listeners {
    gateway: TcpListener,
    registry: TcpListener,
}

/// The registry and gateway listeners plus everything they share.
pub struct GatewayServer {
    config: GatewayConfig,
    store: Arc<RegistryStore>,
    router: Arc<GatewayRouter>,
    shutdown: Arc<ShutdownController>,
    metrics: Option<PrometheusHandle>,
    listeners: Option<Listeners>,
}

impl GatewayServer {
    /// Builds the server with the `reqwest` upstream client.
    ///
    /// # Errors
    ///
    /// Returns an error if the routes are invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let upstream = Arc::new(HttpUpstream::new()?);
        Ok(Self::with_upstream(config, upstream)?)
    }

    /// Builds the server around a caller-supplied [`Upstream`].
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the routes are invalid.
    pub fn with_upstream(
        config: GatewayConfig,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self, ConfigError> {
        let store = Arc::new(RegistryStore::new(&config.registry));
        let table = Arc::new(RoutingTableBuilder::new());
        store.add_observer(Arc::new(LoggingObserver));
        store.add_observer(table.clone());
        table.rebuild(&store.snapshot());

        let router = Arc::new(GatewayRouter::new(config.routing.clone(), table, upstream)?);
        Ok(Self {
            config,
            store,
            router,
            shutdown: Arc::new(ShutdownController::new()),
            metrics: None,
            listeners: None,
        })
    }

    /// Serves `GET /metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[must_use]
    pub fn store(&self) -> Arc<RegistryStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn router(&self) -> Arc<GatewayRouter> {
        Arc::clone(&self.router)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn app_state(&self) -> AppState {
        AppState {
            registration: RegistrationService::new(Arc::clone(&self.store)),
            router: Arc::clone(&self.router),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.network.clone()),
            metrics: self.metrics.clone(),
            start_time: Instant::now(),
        }
    }

    /// Binds both listeners and returns their ports (which differ from the
    /// configured ones when those are 0).
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<BoundPorts> {
        let host = &self.config.network.host;
        let gateway = TcpListener::bind((host.as_str(), self.config.network.port)).await?;
        let registry = TcpListener::bind((host.as_str(), self.config.network.registry_port)).await?;
        let ports = BoundPorts {
            gateway: gateway.local_addr()?.port(),
            registry: registry.local_addr()?.port(),
        };
        info!(
            host = %host,
            gateway_port = ports.gateway,
            registry_port = ports.registry,
            "listeners bound"
        );
        self.listeners = Some(Listeners { gateway, registry });
        Ok(ports)
    }

    /// Serves both listeners until `shutdown` resolves or either server
    /// fails.
    ///
    /// On shutdown: health moves to `Draining` (new proxied requests get
    /// 503), both servers finish their open requests, in-flight proxied
    /// requests are awaited up to the drain timeout, then the expiry
    /// monitor stops.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or a server hits a
    /// fatal I/O error.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let state = self.app_state();
        let Self {
            config,
            store,
            shutdown: controller,
            listeners,
            ..
        } = self;
        let Listeners { gateway, registry } =
            listeners.ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        let mut monitor = ExpiryMonitor::spawn(store, &config.registry);

        let trigger = Arc::clone(&controller);
        tokio::spawn(async move {
            shutdown.await;
            info!("shutdown requested");
            trigger.trigger_shutdown();
        });

        let gateway_app = gateway_router(state.clone());
        let registry_app = registry_router(state);

        controller.set_ready();
        info!("gateway ready");

        let gateway_ctrl = Arc::clone(&controller);
        let gateway_server = async move {
            let result = axum::serve(gateway, gateway_app)
                .with_graceful_shutdown(gateway_ctrl.shutdown_signal())
                .into_future()
                .await;
            gateway_ctrl.trigger_shutdown();
            result
        };
        let registry_ctrl = Arc::clone(&controller);
        let registry_server = async move {
            let result = axum::serve(registry, registry_app)
                .with_graceful_shutdown(registry_ctrl.shutdown_signal())
                .into_future()
                .await;
            registry_ctrl.trigger_shutdown();
            result
        };
        let (gateway_result, registry_result) = tokio::join!(gateway_server, registry_server);

        if controller.wait_for_drain(config.network.drain_timeout).await {
            info!("in-flight requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        monitor.stop().await;
        info!("gateway stopped");

        gateway_result?;
        registry_result?;
        Ok(())
    }
}

/// Routes of the client-facing listener: health probes, everything else proxied.
pub fn gateway_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .fallback(proxy_handler)
        .layer(layers)
        .with_state(state)
}

/// Routes of the registry listener. JSON bodies over `max_body_bytes` get
/// 413 `payload_too_large`.
pub fn registry_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);
    let body_limit = DefaultBodyLimit::max(state.config.max_body_bytes);
    Router::new()
        .route("/registry", get(list_handler))
        .route("/registry/{service_name}", get(list_service_handler))
        .route(
            "/registry/{service_name}/{instance_id}",
            put(register_handler).delete(deregister_handler),
        )
        .route(
            "/registry/{service_name}/{instance_id}/heartbeat",
            put(heartbeat_handler),
        )
        .route(
            "/registry/{service_name}/{instance_id}/status",
            put(status_handler),
        )
        .route("/gateway/routes", get(routes_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .layer(body_limit)
        .layer(layers)
        .with_state(state)
}
