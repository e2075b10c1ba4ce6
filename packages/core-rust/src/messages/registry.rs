//! Registration protocol payloads.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{InstanceAddress, InstanceId, InstanceStatus, Metadata, ServiceName};

/// Body of `PUT /registry/{serviceName}/{instanceId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Where the gateway should send traffic for this instance.
    pub address: InstanceAddress,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Body of `PUT /registry/{serviceName}/{instanceId}/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub status: InstanceStatus,
}

impl StatusUpdateRequest {
    /// Returns the requested status if an instance may assign it to itself.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::StatusNotAssignable` for `STARTING` and
    /// `EXPIRED`.
    pub fn assignable_status(&self) -> Result<InstanceStatus, ValidationError> {
        if self.status.is_self_assignable() {
            Ok(self.status)
        } else {
            Err(ValidationError::StatusNotAssignable(self.status))
        }
    }
}

/// Externally visible state of one registered instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub service_name: ServiceName,
    pub instance_id: InstanceId,
    pub address: InstanceAddress,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    /// Wall-clock registration time, milliseconds since the Unix epoch.
    pub registered_at_ms: u64,
    /// Milliseconds since the last successful renewal (or registration).
    pub last_heartbeat_age_ms: u64,
    /// Successful renewals since the last (re-)registration.
    pub renewals: u64,
}

/// All instances of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub service_name: ServiceName,
    pub instances: Vec<InstanceView>,
}

/// Full registry listing returned by `GET /registry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryView {
    /// Store version the listing was taken at.
    pub version: u64,
    pub services: Vec<ServiceView>,
}
