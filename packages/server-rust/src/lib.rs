//! Waypoint server: service registry with lease expiry and a
//! load-balancing HTTP gateway that routes by path prefix.

pub mod agent;
pub mod config;
pub mod network;
pub mod registry;
pub mod routing;
pub mod telemetry;
pub mod worker;

pub use agent::{AgentConfig, AgentError, HeartbeatAgent, RegistryClient};
pub use config::{Args, ConfigError, GatewayConfig};
pub use network::{BoundPorts, GatewayServer};
pub use registry::{RegistryConfig, RegistryStore};
pub use routing::{GatewayRouter, RoutingConfig};
