//! Request routing: path dispatch, routing table, instance selection, proxying.
//!
//! - [`matcher`]: prefix routes to service names
//! - [`table`]: routable instances per service, rebuilt on registry changes
//! - [`balancer`]: round-robin and random selection
//! - [`router`]: forwarding with retries and suspect tracking

pub mod balancer;
pub mod config;
pub mod error;
pub mod matcher;
pub mod router;
pub mod suspect;
pub mod table;
pub mod upstream;

pub use balancer::{build_policy, RandomPolicy, RoundRobinPolicy, SelectionPolicy};
pub use config::{is_idempotent, RoutingConfig, SelectionPolicyKind, DEFAULT_MAX_RETRIES};
pub use error::RouteError;
pub use matcher::{CompiledRoute, RouteMatch, RouteMatcher};
pub use router::GatewayRouter;
pub use suspect::SuspectList;
pub use table::{RoutingTable, RoutingTableBuilder};
pub use upstream::{
    strip_hop_by_hop, HttpUpstream, ProxyRequest, ProxyResponse, Upstream, UpstreamError,
};
