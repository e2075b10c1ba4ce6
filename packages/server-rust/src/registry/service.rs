//! Registration operations exposed to service instances.
//!
//! Thin layer over [`RegistryStore`] that scopes every call to the
//! `(serviceName, instanceId)` pair from the request path and makes repeated
//! registrations behave as renewals.

use std::sync::Arc;

use tokio::time::Instant;
use waypoint_core::messages::{InstanceView, RegistryView, ServiceView};
use waypoint_core::{InstanceId, InstanceStatus, ServiceName};

use super::store::{InstanceRegistration, RegisterOutcome, RegistryError, RegistryStore};

/// Register / renew / deregister / status operations for instances.
#[derive(Debug, Clone)]
pub struct RegistrationService {
    store: Arc<RegistryStore>,
}

impl RegistrationService {
    #[must_use]
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// Registers an instance.
    ///
    /// Re-sending a registration identical to a `Starting` or `Up` record
    /// (same service, address and metadata) renews it, so instances may use
    /// `PUT` as their heartbeat. Anything else, including re-registering a
    /// `Down` instance, starts a fresh record.
    pub fn register(&self, registration: InstanceRegistration) -> (RegisterOutcome, InstanceView) {
        let (outcome, record) = self.store.register_or_renew(registration);
        (outcome, record.view(Instant::now()))
    }

    /// Renews the lease of `instance_id` within `service_name`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` when the instance is unknown or is
    /// registered under another service; the caller must re-register.
    pub fn renew(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
    ) -> Result<InstanceView, RegistryError> {
        let record = self.store.renew_scoped(service_name, instance_id)?;
        Ok(record.view(Instant::now()))
    }

    /// Sets the status of an instance (only `UP`/`DOWN` reach this point).
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` like [`renew`](Self::renew).
    pub fn set_status(
        &self,
        service_name: &ServiceName,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<InstanceView, RegistryError> {
        let record = self.store.set_status_scoped(service_name, instance_id, status)?;
        Ok(record.view(Instant::now()))
    }

    /// Deregisters an instance. Returns `true` if something was removed;
    /// absence (or a record under another service) is not an error.
    pub fn deregister(&self, service_name: &ServiceName, instance_id: &InstanceId) -> bool {
        self.store
            .deregister_scoped(service_name, instance_id)
            .is_some()
    }

    /// Lists every registered instance, grouped by service.
    #[must_use]
    pub fn list(&self) -> RegistryView {
        self.store.snapshot().view(Instant::now())
    }

    /// Lists the instances of one service (empty when none are registered).
    #[must_use]
    pub fn list_service(&self, service_name: &ServiceName) -> ServiceView {
        let now = Instant::now();
        let snapshot = self.store.snapshot();
        ServiceView {
            service_name: service_name.clone(),
            instances: snapshot.service(service_name).map(|r| r.view(now)).collect(),
        }
    }
}
