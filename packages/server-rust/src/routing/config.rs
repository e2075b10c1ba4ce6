//! Router settings: routes, retry budget, timeouts, selection policy.

use std::time::Duration;

use http::Method;
use serde::Deserialize;
use waypoint_core::RouteSpec;

/// Retry cap applied when no explicit retry budget is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Instance selection policy for the first attempt of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicyKind {
    /// Per-service cursor cycling through instances in turn.
    #[default]
    RoundRobin,
    /// Uniformly random instance.
    Random,
}

/// Configuration for the load-balancing router.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Ordered `(prefix, serviceName)` bindings.
    pub routes: Vec<RouteSpec>,
    /// Maximum retries after the first attempt. `None` means the default
    /// cap of [`DEFAULT_MAX_RETRIES`].
    pub retry_budget: Option<u32>,
    /// Bound on a single upstream attempt (connect + response).
    pub upstream_timeout: Duration,
    /// How long a failed instance stays de-prioritised.
    pub suspect_cooldown: Duration,
    pub policy: SelectionPolicyKind,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            retry_budget: None,
            upstream_timeout: Duration::from_secs(5),
            suspect_cooldown: Duration::from_secs(10),
            policy: SelectionPolicyKind::RoundRobin,
        }
    }
}

impl RoutingConfig {
    /// Retries allowed for one request given how many instances are routable.
    ///
    /// Never more than `instances - 1` (each instance is tried at most once
    /// per request), never more than the configured cap, and at most one
    /// retry for methods that are not idempotent.
    #[must_use]
    pub fn retries_for(&self, instances: usize, method: &Method) -> usize {
        let cap = self.retry_budget.unwrap_or(DEFAULT_MAX_RETRIES) as usize;
        let budget = cap.min(instances.saturating_sub(1));
        if is_idempotent(method) {
            budget
        } else {
            budget.min(1)
        }
    }
}

/// Methods whose repeated application has the same effect as a single one.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE | Method::PUT | Method::DELETE
    )
}
