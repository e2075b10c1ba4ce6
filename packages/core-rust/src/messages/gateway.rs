//! Gateway introspection payloads (`GET /gateway/routes`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{InstanceId, ServiceName};

/// One configured route, after prefix normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub prefix: String,
    pub service_name: ServiceName,
    pub strip_prefix: bool,
}

/// Current routing state of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTableView {
    /// Registry version the routing table was built from.
    pub version: u64,
    pub routes: Vec<RouteView>,
    /// Routable (UP) instances per service, in round-robin order.
    pub services: BTreeMap<ServiceName, Vec<InstanceId>>,
    /// Instances currently de-prioritised after a failed attempt.
    pub suspects: Vec<InstanceId>,
}
