//! Routing table: the routable (`UP`) instances of each service.
//!
//! The table is rebuilt from registry snapshots and published through an
//! `ArcSwap`, so request handlers read it without taking any lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use waypoint_core::{InstanceId, ServiceName};

use crate::registry::{InstanceRecord, RegistryEvent, RegistryObserver, RegistrySnapshot};

/// Immutable view of routable instances, derived from one registry version.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub version: u64,
    services: HashMap<ServiceName, Arc<[InstanceRecord]>>,
}

impl RoutingTable {
    /// Keeps only `UP` instances, grouped by service in `instance_id` order.
    #[must_use]
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let mut grouped: HashMap<ServiceName, Vec<InstanceRecord>> = HashMap::new();
        for record in snapshot.instances.iter().filter(|r| r.status.is_routable()) {
            grouped
                .entry(record.service_name.clone())
                .or_default()
                .push(record.clone());
        }
        Self {
            version: snapshot.version,
            services: grouped
                .into_iter()
                .map(|(name, records)| (name, Arc::from(records)))
                .collect(),
        }
    }

    /// Routable instances of `service_name`; empty when there are none.
    #[must_use]
    pub fn instances(&self, service_name: &ServiceName) -> Arc<[InstanceRecord]> {
        self.services
            .get(service_name)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Number of services with at least one routable instance.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.services.values().map(|v| v.len()).sum()
    }

    /// Instance ids per service, sorted, for the admin view.
    #[must_use]
    pub fn ids(&self) -> BTreeMap<ServiceName, Vec<InstanceId>> {
        self.services
            .iter()
            .map(|(name, records)| {
                (
                    name.clone(),
                    records.iter().map(|r| r.instance_id.clone()).collect(),
                )
            })
            .collect()
    }
}

/// Keeps the current [`RoutingTable`] in step with the registry.
///
/// Registered as a [`RegistryObserver`]. Notifications can arrive out of
/// order, so a table is only published when its version is newer than the
/// one already held.
pub struct RoutingTableBuilder {
    current: ArcSwap<RoutingTable>,
}

impl Default for RoutingTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTableBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RoutingTable::default()),
        }
    }

    /// The table as of the latest applied registry version.
    #[must_use]
    pub fn current(&self) -> Arc<RoutingTable> {
        self.current.load_full()
    }

    /// Rebuilds from `snapshot`. Returns `false` if a newer (or equal)
    /// version was already published and the snapshot was ignored.
    pub fn rebuild(&self, snapshot: &RegistrySnapshot) -> bool {
        let fresh = Arc::new(RoutingTable::from_snapshot(snapshot));
        let previous = self.current.rcu(|current| {
            if current.version >= fresh.version {
                Arc::clone(current)
            } else {
                Arc::clone(&fresh)
            }
        });
        let applied = previous.version < fresh.version;
        if applied {
            record_gauges(&previous, &fresh);
            tracing::debug!(
                version = fresh.version,
                services = fresh.service_count(),
                instances = fresh.instance_count(),
                "routing table rebuilt"
            );
        }
        applied
    }
}

impl RegistryObserver for RoutingTableBuilder {
    fn on_change(&self, _event: &RegistryEvent, snapshot: &Arc<RegistrySnapshot>) {
        self.rebuild(snapshot);
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_gauges(previous: &RoutingTable, fresh: &RoutingTable) {
    for name in previous.services.keys() {
        if !fresh.services.contains_key(name) {
            metrics::gauge!(crate::telemetry::ROUTABLE_INSTANCES, "service" => name.to_string())
                .set(0.0);
        }
    }
    for (name, records) in &fresh.services {
        metrics::gauge!(crate::telemetry::ROUTABLE_INSTANCES, "service" => name.to_string())
            .set(records.len() as f64);
    }
}
