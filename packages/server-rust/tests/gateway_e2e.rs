//! End-to-end: a real `GatewayServer` on loopback ports, real upstream
//! services, registration over HTTP.

use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use waypoint_core::messages::{ErrorBody, RegisterRequest, RoutingTableView};
use waypoint_core::{InstanceAddress, InstanceId, Metadata, RouteSpec, ServiceName};
use waypoint_server::agent::Heartbeat;
use waypoint_server::network::NetworkConfig;
use waypoint_server::{
    AgentConfig, GatewayConfig, GatewayServer, HeartbeatAgent, RegistryClient, RegistryConfig,
    RoutingConfig,
};

struct Running {
    gateway: String,
    registry: String,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(heartbeat_interval: Duration) -> Running {
    let config = GatewayConfig {
        network: NetworkConfig::ephemeral(),
        registry: RegistryConfig::with_heartbeat_interval(heartbeat_interval),
        routing: RoutingConfig {
            routes: vec![RouteSpec::parse_pair("/products/**=product-service").unwrap()],
            upstream_timeout: Duration::from_millis(500),
            ..RoutingConfig::default()
        },
    };
    let mut server = GatewayServer::new(config).unwrap();
    let ports = server.start().await.unwrap();
    let controller = server.shutdown_controller();

    let (stop, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async move {
        let _ = rx.await;
    }));
    while !controller.is_accepting() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Running {
        gateway: format!("http://127.0.0.1:{}", ports.gateway),
        registry: format!("http://127.0.0.1:{}", ports.registry),
        stop: Some(stop),
        handle,
    }
}

/// Upstream answering `<port> <method> <path?query>`.
async fn spawn_upstream() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().fallback(move |request: Request| async move {
        let target = request
            .uri()
            .path_and_query()
            .map(ToString::to_string)
            .unwrap_or_default();
        format!("{port} {} {target}", request.method())
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// A port nothing listens on.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn product_service() -> ServiceName {
    ServiceName::parse("product-service").unwrap()
}

async fn register(client: &RegistryClient, id: &str, port: u16) {
    client
        .register(
            &product_service(),
            &InstanceId::parse(id).unwrap(),
            &RegisterRequest {
                address: InstanceAddress::new("127.0.0.1", port).unwrap(),
                metadata: Metadata::new(),
            },
        )
        .await
        .unwrap();
}

async fn get(url: &str) -> (StatusCode, String) {
    let response = reqwest::get(url).await.unwrap();
    (response.status(), response.text().await.unwrap())
}

#[tokio::test]
async fn round_robin_over_real_upstreams_with_prefix_stripped() {
    let running = start(Duration::from_secs(10)).await;
    let client = RegistryClient::new(&running.registry).unwrap();
    let a = spawn_upstream().await;
    let b = spawn_upstream().await;
    register(&client, "a", a).await;
    register(&client, "b", b).await;

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (status, body) = get(&format!("{}/products/42?x=1", running.gateway)).await;
        assert_eq!(status, StatusCode::OK);
        let (port, rest) = body.split_once(' ').unwrap();
        assert_eq!(rest, "GET /42?x=1");
        seen.push(port.parse::<u16>().unwrap());
    }
    assert_eq!(seen, vec![a, b, a, b]);

    let (status, body) = get(&format!("{}/users", running.gateway)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(serde_json::from_str::<ErrorBody>(&body).unwrap().code, "no_route");

    running.shutdown().await;
}

#[tokio::test]
async fn dead_instance_is_retried_around_and_marked_suspect() {
    let running = start(Duration::from_secs(10)).await;
    let client = RegistryClient::new(&running.registry).unwrap();
    let live = spawn_upstream().await;
    register(&client, "dead", dead_port().await).await;
    register(&client, "live", live).await;

    for _ in 0..4 {
        let (status, body) = get(&format!("{}/products", running.gateway)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(&live.to_string()));
    }

    let view: RoutingTableView = reqwest::get(format!("{}/gateway/routes", running.registry))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view.suspects, vec![InstanceId::parse("dead").unwrap()]);
    assert_eq!(view.services[&product_service()].len(), 2);

    running.shutdown().await;
}

#[tokio::test]
async fn silent_instance_is_evicted_and_must_reregister() {
    let running = start(Duration::from_millis(100)).await;
    let client = RegistryClient::new(&running.registry).unwrap();
    register(&client, "quiet", spawn_upstream().await).await;
    let id = InstanceId::parse("quiet").unwrap();

    let mut evicted = false;
    for _ in 0..100 {
        let (status, _) = get(&format!("{}/products", running.gateway)).await;
        if status == StatusCode::SERVICE_UNAVAILABLE {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(evicted, "instance was never evicted");

    assert_eq!(
        client.heartbeat(&product_service(), &id).await.unwrap(),
        Heartbeat::MustReregister
    );

    running.shutdown().await;
}

#[tokio::test]
async fn agent_keeps_instance_alive_past_the_lease() {
    let running = start(Duration::from_millis(100)).await;
    let port = spawn_upstream().await;
    let mut config = AgentConfig::new(
        running.registry.clone(),
        product_service(),
        InstanceAddress::new("127.0.0.1", port).unwrap(),
    );
    config.heartbeat_interval = Duration::from_millis(50);
    let agent = HeartbeatAgent::start(config).await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    let (status, body) = get(&format!("{}/products/ping", running.gateway)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, format!("{port} GET /ping"));

    agent.stop().await;
    let (status, _) = get(&format!("{}/products/ping", running.gateway)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    running.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_both_listeners() {
    let running = start(Duration::from_secs(10)).await;
    let gateway = running.gateway.clone();
    let registry = running.registry.clone();
    running.shutdown().await;

    assert!(reqwest::get(format!("{gateway}/health")).await.is_err());
    assert!(reqwest::get(format!("{registry}/health")).await.is_err());
}
