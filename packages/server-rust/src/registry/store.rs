//! In-memory registry of live service instances.
//!
//! The store is the single owner of instance records. Every mutation runs
//! inside one write-locked critical section, so readers never observe a
//! half-applied change. Observers are notified after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::time::Instant;
use waypoint_core::messages::{InstanceView, RegistryView, ServiceView};
use waypoint_core::{InstanceAddress, InstanceId, InstanceStatus, Metadata, ServiceName};

use super::config::RegistryConfig;
use super::observer::{CompositeRegistryObserver, RegistryEvent, RegistryObserver};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The instance is not registered. The caller must re-register from
    /// scratch; retrying the same call will not help.
    #[error("instance {instance_id} is not registered")]
    NotFound { instance_id: InstanceId },
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Registration input: everything an instance tells the registry about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRegistration {
    pub service_name: ServiceName,
    pub instance_id: InstanceId,
    pub address: InstanceAddress,
    pub metadata: Metadata,
}

/// A registered instance as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub service_name: ServiceName,
    pub instance_id: InstanceId,
    pub address: InstanceAddress,
    pub status: InstanceStatus,
    pub metadata: Metadata,
    /// Monotonic time of the last renewal (or registration).
    pub last_heartbeat: Instant,
    pub registered_at: SystemTime,
    /// Successful renewals since the last registration.
    pub renewals: u64,
}

impl InstanceRecord {
    fn new(registration: InstanceRegistration, status: InstanceStatus, now: Instant) -> Self {
        Self {
            service_name: registration.service_name,
            instance_id: registration.instance_id,
            address: registration.address,
            status,
            metadata: registration.metadata,
            last_heartbeat: now,
            registered_at: SystemTime::now(),
            renewals: 0,
        }
    }

    /// Time elapsed since the last heartbeat, as of `now`.
    #[must_use]
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    /// Whether this record describes the same registration (same service,
    /// address and metadata) as `registration`.
    #[must_use]
    pub fn matches(&self, registration: &InstanceRegistration) -> bool {
        self.service_name == registration.service_name
            && self.address == registration.address
            && self.metadata == registration.metadata
    }

    /// Builds the external view as of `now`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn view(&self, now: Instant) -> InstanceView {
        let registered_at_ms = self
            .registered_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        InstanceView {
            service_name: self.service_name.clone(),
            instance_id: self.instance_id.clone(),
            address: self.address.clone(),
            status: self.status,
            metadata: self.metadata.clone(),
            registered_at_ms,
            last_heartbeat_age_ms: self.heartbeat_age(now).as_millis() as u64,
            renewals: self.renewals,
        }
    }
}

// ---------------------------------------------------------------------------
// RegistrySnapshot
// ---------------------------------------------------------------------------

/// Immutable copy of every record, taken at one store version.
///
/// Records are sorted by `instance_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub instances: Vec<InstanceRecord>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            instances: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, instance_id: &InstanceId) -> Option<&InstanceRecord> {
        self.instances
            .binary_search_by(|r| r.instance_id.cmp(instance_id))
            .ok()
            .map(|idx| &self.instances[idx])
    }

    /// Records of one service, in `instance_id` order.
    pub fn service<'a>(
        &'a self,
        service_name: &'a ServiceName,
    ) -> impl Iterator<Item = &'a InstanceRecord> + 'a {
        self.instances
            .iter()
            .filter(move |r| &r.service_name == service_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Groups the snapshot by service for `GET /registry`.
    #[must_use]
    pub fn view(&self, now: Instant) -> RegistryView {
        let mut grouped: std::collections::BTreeMap<&ServiceName, Vec<InstanceView>> =
            std::collections::BTreeMap::new();
        for record in &self.instances {
            grouped
                .entry(&record.service_name)
                .or_default()
                .push(record.view(now));
        }
        RegistryView {
            version: self.version,
            services: grouped
                .into_iter()
                .map(|(name, instances)| ServiceView {
                    service_name: name.clone(),
                    instances,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryStore
// ---------------------------------------------------------------------------

/// Outcome of [`RegistryStore::register_or_renew`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new record was created (or an existing one replaced).
    Registered,
    /// The identical registration already existed and was renewed.
    Renewed,
}

type Change = (RegistryEvent, Arc<RegistrySnapshot>);

struct StoreInner {
    records: HashMap<InstanceId, InstanceRecord>,
    version: u64,
}

impl StoreInner {
    /// Bumps the version and snapshots the result of a topology change.
    fn commit(&mut self, event: RegistryEvent) -> Change {
        self.version += 1;
        (event, self.snapshot())
    }

    fn scoped_mut(
        &mut self,
        scope: Option<&ServiceName>,
        instance_id: &InstanceId,
    ) -> Result<&mut InstanceRecord, RegistryError> {
        self.records
            .get_mut(instance_id)
            .filter(|r| scope.is_none_or(|s| *s == r.service_name))
            .ok_or_else(|| RegistryError::NotFound {
                instance_id: instance_id.clone(),
            })
    }

    fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let mut instances: Vec<InstanceRecord> = self.records.values().cloned().collect();
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Arc::new(RegistrySnapshot {
            version: self.version,
            instances,
        })
    }
}

/// Thread-safe table of registered instances keyed by `instanceId`.
///
/// Owned explicitly and shared via `Arc`; there is no global registry.
pub struct RegistryStore {
    inner: RwLock<StoreInner>,
    heartbeats_until_up: u32,
    observers: RwLock<CompositeRegistryObserver>,
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RegistryStore")
            .field("instances", &inner.records.len())
            .field("version", &inner.version)
            .field("heartbeats_until_up", &self.heartbeats_until_up)
            .finish_non_exhaustive()
    }
}

impl RegistryStore {
    /// Creates an empty store with the promotion policy from `config`.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: HashMap::new(),
                version: 0,
            }),
            heartbeats_until_up: config.heartbeats_until_up,
            observers: RwLock::new(CompositeRegistryObserver::default()),
        }
    }

    /// Subscribes an observer to all future topology changes.
    pub fn add_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().add(observer);
    }

    /// Inserts or replaces the record keyed by `instance_id`.
    ///
    /// The new record starts in `Starting` with `last_heartbeat = now`, and
    /// is promoted to `Up` straight away when the promotion policy needs no
    /// heartbeats. Calling this twice with the same input leaves one record.
    pub fn register(&self, registration: InstanceRegistration) -> InstanceRecord {
        let (record, change) = {
            let mut inner = self.inner.write();
            self.insert_locked(&mut inner, registration)
        };
        self.publish(Some(change));
        record
    }

    /// Registers `registration`, or renews the stored record when it
    /// describes the same registration and is still `Starting` or `Up`.
    ///
    /// A `Down` record is always replaced, so an instance restarting under
    /// the same id goes through promotion again. The lookup and the
    /// mutation happen in one critical section.
    pub fn register_or_renew(
        &self,
        registration: InstanceRegistration,
    ) -> (RegisterOutcome, InstanceRecord) {
        let (outcome, record, change) = {
            let mut inner = self.inner.write();
            let renewable = inner.records.get_mut(&registration.instance_id).filter(|r| {
                r.matches(&registration)
                    && matches!(r.status, InstanceStatus::Starting | InstanceStatus::Up)
            });
            match renewable {
                Some(record) => {
                    let promoted = self.touch(record);
                    let record = record.clone();
                    let change = promoted.map(|previous| {
                        inner.commit(RegistryEvent::StatusChanged {
                            record: record.clone(),
                            previous,
                        })
                    });
                    (RegisterOutcome::Renewed, record, change)
                }
                None => {
                    let (record, change) = self.insert_locked(&mut inner, registration);
                    (RegisterOutcome::Registered, record, Some(change))
                }
            }
        };
        self.publish(change);
        (outcome, record)
    }

    /// Records a heartbeat for `instance_id`.
    ///
    /// A `Starting` instance is promoted to `Up` once it has renewed
    /// `heartbeats_until_up` times.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the instance is unknown.
    pub fn renew(&self, instance_id: &InstanceId) -> Result<InstanceRecord, RegistryError> {
        self.renew_in(None, instance_id)
    }

    /// Like [`renew`](Self::renew), but an instance registered under a
    /// service other than `service_name` counts as unknown.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the instance is unknown.
    pub fn renew_scoped(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
    ) -> Result<InstanceRecord, RegistryError> {
        self.renew_in(Some(service_name), instance_id)
    }

    /// Sets the status of a registered instance. Does not count as a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the instance is unknown.
    pub fn set_status(
        &self,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<InstanceRecord, RegistryError> {
        self.set_status_in(None, instance_id, status)
    }

    /// Service-scoped [`set_status`](Self::set_status).
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the instance is unknown or
    /// belongs to another service.
    pub fn set_status_scoped(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<InstanceRecord, RegistryError> {
        self.set_status_in(Some(service_name), instance_id, status)
    }

    /// Removes the record. Returns the removed record, or `None` if it was
    /// already absent (not an error).
    pub fn deregister(&self, instance_id: &InstanceId) -> Option<InstanceRecord> {
        self.deregister_in(None, instance_id)
    }

    /// Service-scoped [`deregister`](Self::deregister): a record under
    /// another service is left alone.
    pub fn deregister_scoped(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
    ) -> Option<InstanceRecord> {
        self.deregister_in(Some(service_name), instance_id)
    }

    fn renew_in(
        &self,
        scope: Option<&ServiceName>,
        instance_id: &InstanceId,
    ) -> Result<InstanceRecord, RegistryError> {
        let (record, change) = {
            let mut inner = self.inner.write();
            let record = inner.scoped_mut(scope, instance_id)?;
            let promoted = self.touch(record);
            let record = record.clone();
            let change = promoted.map(|previous| {
                inner.commit(RegistryEvent::StatusChanged {
                    record: record.clone(),
                    previous,
                })
            });
            (record, change)
        };
        self.publish(change);
        Ok(record)
    }

    fn set_status_in(
        &self,
        scope: Option<&ServiceName>,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<InstanceRecord, RegistryError> {
        let (record, change) = {
            let mut inner = self.inner.write();
            let record = inner.scoped_mut(scope, instance_id)?;
            let previous = std::mem::replace(&mut record.status, status);
            let record = record.clone();
            let change = (previous != status).then(|| {
                inner.commit(RegistryEvent::StatusChanged {
                    record: record.clone(),
                    previous,
                })
            });
            (record, change)
        };
        self.publish(change);
        Ok(record)
    }

    fn deregister_in(
        &self,
        scope: Option<&ServiceName>,
        instance_id: &InstanceId,
    ) -> Option<InstanceRecord> {
        let (removed, change) = {
            let mut inner = self.inner.write();
            inner.scoped_mut(scope, instance_id).ok()?;
            let removed = inner.records.remove(instance_id)?;
            let change = inner.commit(RegistryEvent::Deregistered(removed.clone()));
            (removed, change)
        };
        self.publish(Some(change));
        Some(removed)
    }

    fn insert_locked(
        &self,
        inner: &mut StoreInner,
        registration: InstanceRegistration,
    ) -> (InstanceRecord, Change) {
        let status = if self.heartbeats_until_up == 0 {
            InstanceStatus::Up
        } else {
            InstanceStatus::Starting
        };
        let record = InstanceRecord::new(registration, status, Instant::now());
        let replaced = inner
            .records
            .insert(record.instance_id.clone(), record.clone());
        let change = inner.commit(RegistryEvent::Registered {
            record: record.clone(),
            replaced,
        });
        (record, change)
    }

    /// Refreshes the heartbeat. Returns the previous status when this
    /// renewal promoted the record.
    fn touch(&self, record: &mut InstanceRecord) -> Option<InstanceStatus> {
        record.last_heartbeat = Instant::now();
        record.renewals += 1;
        let promoted = record.status == InstanceStatus::Starting
            && record.renewals >= u64::from(self.heartbeats_until_up);
        if promoted {
            record.status = InstanceStatus::Up;
            Some(InstanceStatus::Starting)
        } else {
            None
        }
    }

    /// Removes every record whose heartbeat is older than `lease`, returning
    /// them with status `Expired`. All removals happen in one critical
    /// section and bump the version once.
    pub fn expire_lapsed(&self, lease: Duration) -> Vec<InstanceRecord> {
        let now = Instant::now();
        let (expired, snapshot) = {
            let mut inner = self.inner.write();
            let lapsed: Vec<InstanceId> = inner
                .records
                .values()
                .filter(|r| r.heartbeat_age(now) > lease)
                .map(|r| r.instance_id.clone())
                .collect();
            if lapsed.is_empty() {
                return Vec::new();
            }

            let mut expired = Vec::with_capacity(lapsed.len());
            for id in &lapsed {
                if let Some(mut record) = inner.records.remove(id) {
                    record.status = InstanceStatus::Expired;
                    expired.push(record);
                }
            }
            inner.version += 1;
            (expired, inner.snapshot())
        };
        self.notify(&RegistryEvent::Expired(expired.clone()), &snapshot);
        expired
    }

    /// Returns an immutable copy of all current records.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.read().snapshot()
    }

    #[must_use]
    pub fn get(&self, instance_id: &InstanceId) -> Option<InstanceRecord> {
        self.inner.read().records.get(instance_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Current store version; bumped on every topology change.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    fn publish(&self, change: Option<Change>) {
        if let Some((event, snapshot)) = change {
            self.notify(&event, &snapshot);
        }
    }

    fn notify(&self, event: &RegistryEvent, snapshot: &Arc<RegistrySnapshot>) {
        let observers = self.observers.read().clone();
        observers.on_change(event, snapshot);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
