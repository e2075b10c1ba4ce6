//! Registry change events and observer fan-out.
//!
//! Defines [`RegistryObserver`] for reacting to topology changes in the
//! [`RegistryStore`](super::RegistryStore), and [`CompositeRegistryObserver`]
//! which forwards each notification to several observers.

use std::sync::Arc;

use waypoint_core::InstanceStatus;

use super::store::{InstanceRecord, RegistrySnapshot};

/// A topology change applied to the registry.
///
/// Renewals that leave the status untouched are not topology changes and
/// produce no event.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// An instance was registered. `replaced` holds the previous record when
    /// the same `instanceId` was already present.
    Registered {
        record: InstanceRecord,
        replaced: Option<InstanceRecord>,
    },
    /// An instance changed status through promotion or an explicit update.
    StatusChanged {
        record: InstanceRecord,
        previous: InstanceStatus,
    },
    /// An instance was removed on request.
    Deregistered(InstanceRecord),
    /// Instances whose lease lapsed, removed in one sweep. Each record
    /// carries status `Expired`.
    Expired(Vec<InstanceRecord>),
}

impl RegistryEvent {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::StatusChanged { .. } => "status_changed",
            Self::Deregistered(_) => "deregistered",
            Self::Expired(_) => "expired",
        }
    }
}

/// Observer notified after each registry topology change.
///
/// Called outside the store lock with the event and a snapshot taken in
/// the same critical section as the mutation. Notifications from
/// concurrent writers may arrive out of order; `snapshot.version` orders
/// them.
///
/// Used as `Arc<dyn RegistryObserver>`.
pub trait RegistryObserver: Send + Sync {
    fn on_change(&self, event: &RegistryEvent, snapshot: &Arc<RegistrySnapshot>);
}

/// Composite observer that forwards to every registered observer in order.
///
/// The store notifies through one of these; cloning copies the list.
#[derive(Clone, Default)]
pub struct CompositeRegistryObserver {
    observers: Vec<Arc<dyn RegistryObserver>>,
}

impl CompositeRegistryObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn RegistryObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn RegistryObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl RegistryObserver for CompositeRegistryObserver {
    fn on_change(&self, event: &RegistryEvent, snapshot: &Arc<RegistrySnapshot>) {
        for observer in &self.observers {
            observer.on_change(event, snapshot);
        }
    }
}

/// Observer that logs topology changes and records registry metrics.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl RegistryObserver for LoggingObserver {
    fn on_change(&self, event: &RegistryEvent, snapshot: &Arc<RegistrySnapshot>) {
        match event {
            RegistryEvent::Registered { record, replaced } => {
                tracing::info!(
                    service = %record.service_name,
                    instance = %record.instance_id,
                    address = %record.address,
                    status = %record.status,
                    replaced = replaced.is_some(),
                    version = snapshot.version,
                    "instance registered"
                );
                metrics::counter!(crate::telemetry::REGISTRATIONS_TOTAL).increment(1);
            }
            RegistryEvent::StatusChanged { record, previous } => {
                tracing::info!(
                    service = %record.service_name,
                    instance = %record.instance_id,
                    from = %previous,
                    to = %record.status,
                    version = snapshot.version,
                    "instance status changed"
                );
            }
            RegistryEvent::Deregistered(record) => {
                tracing::info!(
                    service = %record.service_name,
                    instance = %record.instance_id,
                    version = snapshot.version,
                    "instance deregistered"
                );
                metrics::counter!(crate::telemetry::DEREGISTRATIONS_TOTAL).increment(1);
            }
            RegistryEvent::Expired(records) => {
                for record in records {
                    tracing::warn!(
                        service = %record.service_name,
                        instance = %record.instance_id,
                        address = %record.address,
                        version = snapshot.version,
                        "instance lease expired, evicted"
                    );
                }
                metrics::counter!(crate::telemetry::EVICTIONS_TOTAL).increment(records.len() as u64);
            }
        }
    }
}
