//! Startup configuration: command line, environment, optional JSON file.
//!
//! Precedence is CLI (or `WAYPOINT_*` environment) over the `--config` file
//! over built-in defaults. The merged result is validated once into an
//! immutable [`GatewayConfig`]; nothing is re-read at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use waypoint_core::{RouteSpec, ValidationError};

use crate::network::NetworkConfig;
use crate::registry::RegistryConfig;
use crate::routing::{RouteMatcher, RoutingConfig, SelectionPolicyKind};
use crate::telemetry::LogFormat;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invalid startup configuration. Fatal: the process exits before binding.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,

    #[error("lease duration ({lease:?}) must be longer than the heartbeat interval ({interval:?})")]
    LeaseTooShort { lease: Duration, interval: Duration },

    #[error("upstream timeout must be greater than zero")]
    ZeroUpstreamTimeout,

    #[error("invalid route prefix {prefix:?}: {source}")]
    InvalidRoute {
        prefix: String,
        source: ValidationError,
    },

    #[error("route prefix {prefix} is configured more than once")]
    DuplicateRoute { prefix: String },

    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Service registry and dynamic routing gateway.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "waypoint", version, about)]
pub struct Args {
    /// JSON configuration file (camelCase keys).
    #[arg(long, env = "WAYPOINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address for both listeners.
    #[arg(long, env = "WAYPOINT_HOST")]
    pub host: Option<String>,

    /// Gateway (routing ingress) port.
    #[arg(long, env = "WAYPOINT_PORT")]
    pub port: Option<u16>,

    /// Registry API port.
    #[arg(long, env = "WAYPOINT_REGISTRY_PORT")]
    pub registry_port: Option<u16>,

    /// Expected heartbeat cadence of instances, in seconds.
    #[arg(long, env = "WAYPOINT_HEARTBEAT_INTERVAL_SECS")]
    pub heartbeat_interval_secs: Option<u64>,

    /// Lease duration in seconds (default: three heartbeat intervals).
    #[arg(long, env = "WAYPOINT_LEASE_DURATION_SECS")]
    pub lease_duration_secs: Option<u64>,

    /// Heartbeats a new instance must send before it becomes routable.
    #[arg(long, env = "WAYPOINT_HEARTBEATS_UNTIL_UP")]
    pub heartbeats_until_up: Option<u32>,

    /// Maximum retries per request after the first attempt.
    #[arg(long, env = "WAYPOINT_RETRY_BUDGET")]
    pub retry_budget: Option<u32>,

    /// Per-attempt upstream timeout, in seconds.
    #[arg(long, env = "WAYPOINT_UPSTREAM_TIMEOUT_SECS")]
    pub upstream_timeout_secs: Option<u64>,

    /// How long a failing instance is de-prioritised, in seconds.
    #[arg(long, env = "WAYPOINT_SUSPECT_COOLDOWN_SECS")]
    pub suspect_cooldown_secs: Option<u64>,

    /// Instance selection policy.
    #[arg(long, value_enum, env = "WAYPOINT_POLICY")]
    pub policy: Option<SelectionPolicyKind>,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "WAYPOINT_MAX_BODY_BYTES")]
    pub max_body_bytes: Option<usize>,

    /// Overall request timeout, in seconds.
    #[arg(long, env = "WAYPOINT_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Allowed CORS origin (repeatable).
    #[arg(long = "cors-origin", env = "WAYPOINT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Route binding `PREFIX=SERVICE` (repeatable, evaluated longest prefix first).
    #[arg(long = "route", value_name = "PREFIX=SERVICE", env = "WAYPOINT_ROUTES", value_delimiter = ',', value_parser = parse_route)]
    pub routes: Vec<RouteSpec>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "WAYPOINT_LOG_FORMAT")]
    pub log_format: LogFormat,
}

fn parse_route(raw: &str) -> Result<RouteSpec, ValidationError> {
    RouteSpec::parse_pair(raw)
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Contents of the `--config` file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub registry_port: Option<u16>,
    pub heartbeat_interval_seconds: Option<u64>,
    pub lease_duration_seconds: Option<u64>,
    pub heartbeats_until_up: Option<u32>,
    pub retry_budget: Option<u32>,
    pub upstream_timeout_seconds: Option<u64>,
    pub suspect_cooldown_seconds: Option<u64>,
    pub policy: Option<SelectionPolicyKind>,
    pub max_body_bytes: Option<usize>,
    pub request_timeout_seconds: Option<u64>,
    pub cors_origins: Option<Vec<String>>,
    pub routes: Option<Vec<RouteSpec>>,
}

impl FileConfig {
    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Read` if the file cannot be read, `ConfigError::Parse`
    /// if it is not valid JSON of the expected shape.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// Validated configuration for the whole process.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub routing: RoutingConfig,
}

impl GatewayConfig {
    /// Loads the file named by `--config` (if any), applies `args` on top
    /// and validates the result.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`].
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, args)
    }

    /// Merges `file` and `args` (args win) over the defaults and validates.
    ///
    /// # Errors
    ///
    /// Any validation [`ConfigError`].
    pub fn merge(file: FileConfig, args: &Args) -> Result<Self, ConfigError> {
        let mut network = NetworkConfig::default();
        if let Some(host) = args.host.clone().or(file.host) {
            network.host = host;
        }
        if let Some(port) = args.port.or(file.port) {
            network.port = port;
        }
        if let Some(port) = args.registry_port.or(file.registry_port) {
            network.registry_port = port;
        }
        if let Some(bytes) = args.max_body_bytes.or(file.max_body_bytes) {
            network.max_body_bytes = bytes;
        }
        if let Some(secs) = args.request_timeout_secs.or(file.request_timeout_seconds) {
            network.request_timeout = Duration::from_secs(secs);
        }
        if !args.cors_origins.is_empty() {
            network.cors_origins.clone_from(&args.cors_origins);
        } else if let Some(origins) = file.cors_origins {
            network.cors_origins = origins;
        }

        let mut registry = match args
            .heartbeat_interval_secs
            .or(file.heartbeat_interval_seconds)
        {
            Some(secs) => RegistryConfig::with_heartbeat_interval(Duration::from_secs(secs)),
            None => RegistryConfig::default(),
        };
        if let Some(secs) = args.lease_duration_secs.or(file.lease_duration_seconds) {
            registry.lease_duration = Duration::from_secs(secs);
        }
        if let Some(n) = args.heartbeats_until_up.or(file.heartbeats_until_up) {
            registry.heartbeats_until_up = n;
        }

        let mut routing = RoutingConfig {
            retry_budget: args.retry_budget.or(file.retry_budget),
            ..RoutingConfig::default()
        };
        if let Some(secs) = args.upstream_timeout_secs.or(file.upstream_timeout_seconds) {
            routing.upstream_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = args.suspect_cooldown_secs.or(file.suspect_cooldown_seconds) {
            routing.suspect_cooldown = Duration::from_secs(secs);
        }
        if let Some(policy) = args.policy.or(file.policy) {
            routing.policy = policy;
        }
        routing.routes = if args.routes.is_empty() {
            file.routes.unwrap_or_default()
        } else {
            args.routes.clone()
        };

        let config = Self {
            network,
            registry,
            routing,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks timing relationships and routes.
    ///
    /// # Errors
    ///
    /// The first violated rule, as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.registry.heartbeat_interval;
        if interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if self.registry.lease_duration <= interval {
            return Err(ConfigError::LeaseTooShort {
                lease: self.registry.lease_duration,
                interval,
            });
        }
        if self.routing.upstream_timeout.is_zero() {
            return Err(ConfigError::ZeroUpstreamTimeout);
        }
        RouteMatcher::new(&self.routing.routes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["waypoint"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    fn config_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::from_args(&args(&[])).unwrap();
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.network.registry_port, 8761);
        assert_eq!(config.registry.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.registry.lease_duration, Duration::from_secs(30));
        assert_eq!(config.routing.upstream_timeout, Duration::from_secs(5));
        assert!(config.routing.routes.is_empty());
    }

    #[test]
    fn lease_defaults_to_three_intervals() {
        let config = GatewayConfig::from_args(&args(&["--heartbeat-interval-secs", "4"])).unwrap();
        assert_eq!(config.registry.lease_duration, Duration::from_secs(12));
    }

    #[test]
    fn cli_routes_are_parsed_in_order() {
        let config = GatewayConfig::from_args(&args(&[
            "--route",
            "/products/**=product-service",
            "--route",
            "/users=user-service",
        ]))
        .unwrap();
        let routes = &config.routing.routes;
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].service_name.as_str(), "PRODUCT-SERVICE");
        assert_eq!(routes[1].prefix, "/users");
    }

    #[test]
    fn malformed_route_argument_is_rejected_by_the_parser() {
        assert!(Args::try_parse_from(["waypoint", "--route", "no-equals-sign"]).is_err());
    }

    #[test]
    fn file_values_apply_and_cli_overrides_them() {
        let file = config_file(
            r#"{
                "heartbeatIntervalSeconds": 5,
                "leaseDurationSeconds": 20,
                "retryBudget": 1,
                "upstreamTimeoutSeconds": 2,
                "policy": "random",
                "routes": [
                    { "prefix": "/orders/**", "serviceName": "order-service" },
                    { "prefix": "/static", "serviceName": "web", "stripPrefix": false }
                ]
            }"#,
        );
        let path = file.path().to_str().unwrap();

        let config = GatewayConfig::from_args(&args(&["--config", path])).unwrap();
        assert_eq!(config.registry.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.registry.lease_duration, Duration::from_secs(20));
        assert_eq!(config.routing.retry_budget, Some(1));
        assert_eq!(config.routing.upstream_timeout, Duration::from_secs(2));
        assert_eq!(config.routing.policy, SelectionPolicyKind::Random);
        assert_eq!(config.routing.routes.len(), 2);
        assert!(!config.routing.routes[1].strip_prefix);

        let config = GatewayConfig::from_args(&args(&[
            "--config",
            path,
            "--retry-budget",
            "4",
            "--policy",
            "round-robin",
            "--route",
            "/api=api-service",
        ]))
        .unwrap();
        assert_eq!(config.routing.retry_budget, Some(4));
        assert_eq!(config.routing.policy, SelectionPolicyKind::RoundRobin);
        assert_eq!(config.routing.routes.len(), 1);
    }

    #[test]
    fn invalid_timings_are_rejected() {
        assert!(matches!(
            GatewayConfig::from_args(&args(&["--heartbeat-interval-secs", "0"])),
            Err(ConfigError::ZeroHeartbeatInterval)
        ));
        assert!(matches!(
            GatewayConfig::from_args(&args(&[
                "--heartbeat-interval-secs",
                "10",
                "--lease-duration-secs",
                "10"
            ])),
            Err(ConfigError::LeaseTooShort { .. })
        ));
        assert!(matches!(
            GatewayConfig::from_args(&args(&["--upstream-timeout-secs", "0"])),
            Err(ConfigError::ZeroUpstreamTimeout)
        ));
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let err = GatewayConfig::from_args(&args(&[
            "--route",
            "/a/**=x",
            "--route",
            "/a/*=y",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRoute { .. }));
    }

    #[test]
    fn unreadable_or_malformed_files_are_errors() {
        let missing = GatewayConfig::from_args(&args(&["--config", "/nonexistent/waypoint.json"]));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let file = config_file(r#"{ "heartbeatIntervalSecs": 5 }"#);
        let unknown_key =
            GatewayConfig::from_args(&args(&["--config", file.path().to_str().unwrap()]));
        assert!(matches!(unknown_key, Err(ConfigError::Parse { .. })));
    }
}
