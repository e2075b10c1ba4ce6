//! Listener and HTTP-layer configuration.

use std::time::Duration;

/// Default port of the client-facing gateway listener.
pub const DEFAULT_GATEWAY_PORT: u16 = 8080;
/// Default port of the registry listener.
pub const DEFAULT_REGISTRY_PORT: u16 = 8761;
/// Default cap on buffered request bodies (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Network configuration for both listeners.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address shared by both listeners.
    pub host: String,
    /// Gateway (routing ingress) port. 0 means OS-assigned.
    pub port: u16,
    /// Registry API port. 0 means OS-assigned.
    pub registry_port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete, retries included.
    pub request_timeout: Duration,
    /// Largest request body accepted for proxying or registration.
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            registry_port: DEFAULT_REGISTRY_PORT,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    /// Loopback configuration with OS-assigned ports, for tests and embedding.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            registry_port: 0,
            ..Self::default()
        }
    }
}
