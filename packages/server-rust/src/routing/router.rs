//! Load-balancing router: picks an instance, forwards, retries on failure.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio::time::Instant;
use waypoint_core::messages::RoutingTableView;
use waypoint_core::ServiceName;

use super::balancer::{build_policy, SelectionPolicy};
use super::config::RoutingConfig;
use super::error::RouteError;
use super::matcher::RouteMatcher;
use super::suspect::SuspectList;
use super::table::RoutingTableBuilder;
use super::upstream::{strip_hop_by_hop, ProxyRequest, ProxyResponse, Upstream, UpstreamError};
use crate::config::ConfigError;
use crate::registry::InstanceRecord;
use crate::telemetry;

/// Dispatches requests to instances of the service their path maps to.
///
/// The first attempt goes to the instance chosen by the selection policy,
/// skipping suspects while a healthy alternative exists. A failed attempt
/// marks the instance suspect and the request moves on to the next untried
/// instance in routing-table order, until the retry budget is spent.
pub struct GatewayRouter {
    matcher: RouteMatcher,
    table: Arc<RoutingTableBuilder>,
    policy: Arc<dyn SelectionPolicy>,
    suspects: SuspectList,
    upstream: Arc<dyn Upstream>,
    config: RoutingConfig,
}

impl GatewayRouter {
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configured routes are invalid.
    pub fn new(
        config: RoutingConfig,
        table: Arc<RoutingTableBuilder>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            matcher: RouteMatcher::new(&config.routes)?,
            policy: build_policy(config.policy),
            suspects: SuspectList::new(config.suspect_cooldown),
            table,
            upstream,
            config,
        })
    }

    #[must_use]
    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RoutingTableBuilder> {
        &self.table
    }

    #[must_use]
    pub fn suspects(&self) -> &SuspectList {
        &self.suspects
    }

    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        self.config.upstream_timeout
    }

    /// Routes, routable instances and suspects, for `GET /gateway/routes`.
    #[must_use]
    pub fn view(&self) -> RoutingTableView {
        let table = self.table.current();
        RoutingTableView {
            version: table.version,
            routes: self.matcher.views(),
            services: table.ids(),
            suspects: self.suspects.list(),
        }
    }

    /// Resolves `path` against the routes and forwards the request.
    ///
    /// # Errors
    ///
    /// `RouteError::NoRoute` when no prefix matches, otherwise as
    /// [`route`](Self::route).
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<ProxyResponse, RouteError> {
        let hit = self
            .matcher
            .resolve(path, query)
            .ok_or_else(|| RouteError::NoRoute {
                path: path.to_string(),
            })?;
        let service = hit.route.service_name.clone();
        strip_hop_by_hop(&mut headers);
        let request = ProxyRequest {
            method,
            path_and_query: hit.forward_path,
            headers,
            body,
        };
        self.route(&service, request).await
    }

    /// Forwards `request` to an instance of `service_name`.
    ///
    /// Any HTTP response from an instance, whatever its status, is returned
    /// as is. Only failures to get a response are retried.
    ///
    /// # Errors
    ///
    /// - `RouteError::ServiceUnavailable` when the service has no routable
    ///   instance; no network call is made.
    /// - `RouteError::UpstreamUnavailable` when every attempt failed.
    pub async fn route(
        &self,
        service_name: &ServiceName,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, RouteError> {
        let table = self.table.current();
        let instances = table.instances(service_name);
        if instances.is_empty() {
            record_outcome(service_name, "no_instances");
            return Err(RouteError::ServiceUnavailable {
                service: service_name.clone(),
            });
        }

        let max_attempts = self.config.retries_for(instances.len(), &request.method) + 1;
        let mut tried = vec![false; instances.len()];
        let mut current = self.first_pick(service_name, &instances);
        let mut attempts = 0;

        let last_error = loop {
            tried[current] = true;
            attempts += 1;
            let error = match self.attempt(service_name, &instances[current], &request).await {
                Ok(response) => {
                    record_outcome(service_name, "ok");
                    return Ok(response);
                }
                Err(error) => error,
            };
            if attempts >= max_attempts {
                break error;
            }
            match self.next_pick(&instances, current, &tried) {
                Some(next) => {
                    tracing::debug!(
                        service = %service_name,
                        failed = %instances[current].instance_id,
                        next = %instances[next].instance_id,
                        attempt = attempts + 1,
                        "retrying on next instance"
                    );
                    current = next;
                }
                None => break error,
            }
        };

        record_outcome(service_name, "exhausted");
        Err(RouteError::UpstreamUnavailable {
            service: service_name.clone(),
            attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        service_name: &ServiceName,
        instance: &InstanceRecord,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, UpstreamError> {
        tracing::debug!(
            service = %service_name,
            instance = %instance.instance_id,
            address = %instance.address,
            method = %request.method,
            path = %request.path_and_query,
            "forwarding request"
        );
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.config.upstream_timeout,
            self.upstream.send(&instance.address, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                address: instance.address.clone(),
            }),
        };

        let service_label = service_name.to_string();
        match &result {
            Ok(response) => {
                self.suspects.clear(&instance.instance_id);
                metrics::counter!(telemetry::UPSTREAM_ATTEMPTS_TOTAL, "service" => service_label.clone(), "outcome" => "ok")
                    .increment(1);
                metrics::histogram!(telemetry::UPSTREAM_LATENCY_SECONDS, "service" => service_label)
                    .record(started.elapsed().as_secs_f64());
                tracing::debug!(
                    service = %service_name,
                    instance = %instance.instance_id,
                    status = response.status.as_u16(),
                    "upstream responded"
                );
            }
            Err(error) => {
                self.suspects.mark(&instance.instance_id);
                metrics::counter!(telemetry::UPSTREAM_ATTEMPTS_TOTAL, "service" => service_label, "outcome" => error.outcome())
                    .increment(1);
                tracing::warn!(
                    service = %service_name,
                    instance = %instance.instance_id,
                    error = %error,
                    "upstream attempt failed, instance marked suspect"
                );
            }
        }
        result
    }

    /// Index of the instance for the first attempt.
    fn first_pick(&self, service_name: &ServiceName, instances: &[InstanceRecord]) -> usize {
        let healthy: Vec<usize> = (0..instances.len())
            .filter(|&i| !self.suspects.is_suspect(&instances[i].instance_id))
            .collect();
        if healthy.is_empty() || healthy.len() == instances.len() {
            self.policy.select(service_name, instances.len())
        } else {
            healthy[self.policy.select(service_name, healthy.len())]
        }
    }

    /// Next untried instance after `from` in table order, preferring
    /// non-suspects.
    fn next_pick(&self, instances: &[InstanceRecord], from: usize, tried: &[bool]) -> Option<usize> {
        let n = instances.len();
        let mut fallback = None;
        for idx in (1..n).map(|step| (from + step) % n).filter(|&i| !tried[i]) {
            if !self.suspects.is_suspect(&instances[idx].instance_id) {
                return Some(idx);
            }
            fallback.get_or_insert(idx);
        }
        fallback
    }
}

fn record_outcome(service_name: &ServiceName, outcome: &'static str) {
    metrics::counter!(telemetry::ROUTED_REQUESTS_TOTAL, "service" => service_name.to_string(), "outcome" => outcome)
        .increment(1);
}
