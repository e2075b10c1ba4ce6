//! Logging and metrics setup, plus the metric names recorded across the crate.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

// ---------------------------------------------------------------------------
// Metric names
// ---------------------------------------------------------------------------

pub const REGISTRATIONS_TOTAL: &str = "waypoint_registrations_total";
pub const DEREGISTRATIONS_TOTAL: &str = "waypoint_deregistrations_total";
pub const EVICTIONS_TOTAL: &str = "waypoint_evictions_total";
/// Labels: `service`, `outcome` (`ok`, `no_instances`, `exhausted`).
pub const ROUTED_REQUESTS_TOTAL: &str = "waypoint_routed_requests_total";
/// Labels: `service`, `outcome` (`ok`, `error`, `timeout`).
pub const UPSTREAM_ATTEMPTS_TOTAL: &str = "waypoint_upstream_attempts_total";
/// Labels: `service`.
pub const UPSTREAM_LATENCY_SECONDS: &str = "waypoint_upstream_latency_seconds";
/// Labels: `service`.
pub const ROUTABLE_INSTANCES: &str = "waypoint_routable_instances";

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "waypoint=info,waypoint_server=info,tower_http=info";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Installs the global Prometheus recorder and returns the handle used to
/// render `GET /metrics`.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(REGISTRATIONS_TOTAL, "Instance registrations accepted");
    metrics::describe_counter!(DEREGISTRATIONS_TOTAL, "Instances removed on request");
    metrics::describe_counter!(EVICTIONS_TOTAL, "Instances evicted after their lease lapsed");
    metrics::describe_counter!(ROUTED_REQUESTS_TOTAL, "Requests dispatched by the router");
    metrics::describe_counter!(UPSTREAM_ATTEMPTS_TOTAL, "Individual upstream attempts");
    metrics::describe_histogram!(
        UPSTREAM_LATENCY_SECONDS,
        metrics::Unit::Seconds,
        "Latency of successful upstream attempts"
    );
    metrics::describe_gauge!(ROUTABLE_INSTANCES, "Routable instances per service");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(REGISTRATIONS_TOTAL).increment(2);
        });
        let rendered = handle.render();
        assert!(rendered.contains("waypoint_registrations_total 2"));
    }

    #[test]
    fn default_log_format_is_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
