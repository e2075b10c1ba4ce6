//! Client side of the registration protocol, for domain services.
//!
//! [`RegistryClient`] wraps the registry HTTP API. [`HeartbeatAgent`]
//! registers an instance, renews its lease on a fixed cadence, registers
//! again when the registry has forgotten it, and deregisters on stop.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::Url;
use tokio::sync::oneshot;
use waypoint_core::messages::{error_codes, ErrorBody, InstanceView, RegisterRequest};
use waypoint_core::{InstanceAddress, InstanceId, Metadata, ServiceName};

use crate::worker::{BackgroundRunnable, BackgroundWorker};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid registry url {0}")]
    InvalidRegistryUrl(String),

    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
}

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

/// Result of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heartbeat {
    Renewed(InstanceView),
    /// The registry no longer knows the instance (it was evicted or never
    /// registered); the caller must register again.
    MustReregister,
}

/// Thin typed client for the registry listener.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base: Url,
}

impl RegistryClient {
    /// `base_url` is the registry listener root, e.g. `http://10.0.0.2:8761`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable or non-hierarchical URL, or if the
    /// HTTP client cannot be initialised.
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let base = Url::parse(base_url)
            .map_err(|e| AgentError::InvalidRegistryUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(AgentError::InvalidRegistryUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base })
    }

    fn url(&self, service_name: &ServiceName, instance_id: &InstanceId, tail: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["registry", service_name.as_str(), instance_id.as_str()]);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        url
    }

    /// # Errors
    ///
    /// Transport failures and non-200 responses.
    pub async fn register(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
        request: &RegisterRequest,
    ) -> Result<InstanceView, AgentError> {
        let response = self
            .client
            .put(self.url(service_name, instance_id, None))
            .json(request)
            .send()
            .await?;
        if response.status() == StatusCode::OK {
            return Ok(response.json().await?);
        }
        Err(rejected("register", response).await)
    }

    /// # Errors
    ///
    /// Transport failures and responses other than 200 or 404
    /// `must_reregister`.
    pub async fn heartbeat(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
    ) -> Result<Heartbeat, AgentError> {
        let response = self
            .client
            .put(self.url(service_name, instance_id, Some("heartbeat")))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(Heartbeat::Renewed(response.json().await?)),
            StatusCode::NOT_FOUND => {
                let status = response.status();
                let body = response.text().await?;
                match serde_json::from_str::<ErrorBody>(&body) {
                    Ok(error) if error.code == error_codes::MUST_REREGISTER => {
                        Ok(Heartbeat::MustReregister)
                    }
                    _ => Err(AgentError::Rejected {
                        operation: "heartbeat",
                        status,
                        body,
                    }),
                }
            }
            _ => Err(rejected("heartbeat", response).await),
        }
    }

    /// # Errors
    ///
    /// Transport failures and responses other than 204.
    pub async fn deregister(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
    ) -> Result<(), AgentError> {
        let response = self
            .client
            .delete(self.url(service_name, instance_id, None))
            .send()
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        Err(rejected("deregister", response).await)
    }
}

async fn rejected(operation: &'static str, response: reqwest::Response) -> AgentError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    AgentError::Rejected {
        operation,
        status,
        body,
    }
}

// ---------------------------------------------------------------------------
// HeartbeatAgent
// ---------------------------------------------------------------------------

/// Identity and cadence of the instance an agent keeps registered.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub registry_url: String,
    pub service_name: ServiceName,
    pub instance_id: InstanceId,
    pub address: InstanceAddress,
    pub metadata: Metadata,
    /// Must be shorter than the registry's lease.
    pub heartbeat_interval: Duration,
}

impl AgentConfig {
    /// Config with a random UUID instance id and a 10 s heartbeat.
    #[must_use]
    pub fn new(registry_url: impl Into<String>, service_name: ServiceName, address: InstanceAddress) -> Self {
        let instance_id = InstanceId::parse(&uuid::Uuid::new_v4().to_string())
            .unwrap_or_else(|_| unreachable!("a hyphenated uuid is a valid instance id"));
        Self {
            registry_url: registry_url.into(),
            service_name,
            instance_id,
            address,
            metadata: Metadata::new(),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// On-demand work for the agent loop.
#[derive(Debug)]
pub enum AgentTask {
    /// Heartbeat now; replies whether the instance is registered afterwards.
    BeatNow(oneshot::Sender<bool>),
}

struct AgentLoop {
    client: RegistryClient,
    config: AgentConfig,
    beats: u64,
}

impl AgentLoop {
    fn request(&self) -> RegisterRequest {
        RegisterRequest {
            address: self.config.address.clone(),
            metadata: self.config.metadata.clone(),
        }
    }

    async fn register(&self) -> Result<InstanceView, AgentError> {
        self.client
            .register(&self.config.service_name, &self.config.instance_id, &self.request())
            .await
    }

    /// One heartbeat, re-registering if needed. Failures are logged and
    /// retried on the next beat.
    async fn beat(&mut self) -> bool {
        self.beats += 1;
        let config = &self.config;
        match self
            .client
            .heartbeat(&config.service_name, &config.instance_id)
            .await
        {
            Ok(Heartbeat::Renewed(view)) => {
                tracing::trace!(instance = %view.instance_id, status = %view.status, "lease renewed");
                true
            }
            Ok(Heartbeat::MustReregister) => {
                tracing::warn!(
                    service = %config.service_name,
                    instance = %config.instance_id,
                    "registry lost this instance, registering again"
                );
                match self.register().await {
                    Ok(_) => true,
                    Err(err) => {
                        tracing::warn!(error = %err, "re-registration failed");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    service = %config.service_name,
                    instance = %config.instance_id,
                    error = %err,
                    "heartbeat failed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for AgentLoop {
    type Task = AgentTask;

    fn name(&self) -> &'static str {
        "heartbeat-agent"
    }

    async fn run(&mut self, task: AgentTask) {
        match task {
            AgentTask::BeatNow(reply) => {
                let ok = self.beat().await;
                let _ = reply.send(ok);
            }
        }
    }

    async fn on_tick(&mut self) {
        self.beat().await;
    }

    async fn shutdown(&mut self) {
        let config = &self.config;
        match self
            .client
            .deregister(&config.service_name, &config.instance_id)
            .await
        {
            Ok(()) => tracing::info!(
                service = %config.service_name,
                instance = %config.instance_id,
                beats = self.beats,
                "deregistered"
            ),
            Err(err) => tracing::warn!(error = %err, "deregistration failed"),
        }
    }
}

/// Keeps one instance registered until stopped.
pub struct HeartbeatAgent {
    service_name: ServiceName,
    instance_id: InstanceId,
    worker: BackgroundWorker<AgentLoop>,
}

impl HeartbeatAgent {
    /// Registers the instance, then renews every `heartbeat_interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial registration fails; nothing is
    /// left running in that case.
    pub async fn start(config: AgentConfig) -> Result<Self, AgentError> {
        let client = RegistryClient::new(&config.registry_url)?;
        let agent = AgentLoop {
            client,
            config,
            beats: 0,
        };
        let view = agent.register().await?;
        tracing::info!(
            service = %view.service_name,
            instance = %view.instance_id,
            address = %view.address,
            status = %view.status,
            "registered with registry"
        );

        let interval = agent.config.heartbeat_interval;
        let service_name = agent.config.service_name.clone();
        let instance_id = agent.config.instance_id.clone();
        Ok(Self {
            service_name,
            instance_id,
            worker: BackgroundWorker::start(agent, interval),
        })
    }

    #[must_use]
    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Sends a heartbeat immediately. Returns whether the instance is
    /// registered afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent has been stopped.
    pub async fn beat_now(&self) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.worker.submit(AgentTask::BeatNow(tx)).await?;
        Ok(rx.await?)
    }

    /// Stops heartbeating and deregisters.
    pub async fn stop(mut self) {
        self.worker.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::network::handlers::test_support;
    use crate::network::registry_router;
    use crate::registry::RegistryStore;

    async fn registry() -> (Arc<RegistryStore>, String) {
        let state = test_support::state();
        let store = Arc::clone(state.registration.store());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, registry_router(state)).await.unwrap();
        });
        (store, url)
    }

    fn config(url: &str) -> AgentConfig {
        let mut config = AgentConfig::new(
            url,
            ServiceName::parse("product-service").unwrap(),
            InstanceAddress::new("127.0.0.1", 9001).unwrap(),
        );
        config.heartbeat_interval = Duration::from_secs(3600);
        config
    }

    #[tokio::test]
    async fn registers_renews_and_deregisters() {
        let (store, url) = registry().await;
        let agent = HeartbeatAgent::start(config(&url)).await.unwrap();
        let id = agent.instance_id().clone();
        assert!(store.get(&id).is_some());

        assert!(agent.beat_now().await.unwrap());
        assert_eq!(store.get(&id).unwrap().renewals, 1);

        agent.stop().await;
        assert!(store.get(&id).is_none());
    }

    #[tokio::test]
    async fn re_registers_after_eviction() {
        let (store, url) = registry().await;
        let agent = HeartbeatAgent::start(config(&url)).await.unwrap();
        let id = agent.instance_id().clone();

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.expire_lapsed(Duration::ZERO);
        assert!(store.get(&id).is_none());

        assert!(agent.beat_now().await.unwrap());
        assert!(store.get(&id).is_some());
        agent.stop().await;
    }

    #[tokio::test]
    async fn start_fails_when_registry_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        assert!(matches!(
            HeartbeatAgent::start(config(&url)).await,
            Err(AgentError::Http(_))
        ));
    }

    #[test]
    fn urls_encode_path_segments() {
        let client = RegistryClient::new("http://registry:8761/").unwrap();
        let url = client.url(
            &ServiceName::parse("orders").unwrap(),
            &InstanceId::parse("a#1").unwrap(),
            Some("heartbeat"),
        );
        assert_eq!(url.as_str(), "http://registry:8761/registry/ORDERS/a%231/heartbeat");
        assert!(RegistryClient::new("not a url").is_err());
    }
}
