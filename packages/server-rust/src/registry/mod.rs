//! Service registry: instance store, lease expiry, registration operations.
//!
//! - [`store`]: `RegistryStore`, the single owner of instance records
//! - [`observer`]: change events and the observer fan-out
//! - [`monitor`]: background eviction of lapsed leases
//! - [`service`]: path-scoped register/renew/deregister/status operations

pub mod config;
pub mod monitor;
pub mod observer;
pub mod service;
pub mod store;

pub use config::RegistryConfig;
pub use monitor::{ExpiryMonitor, MonitorHandle, MonitorTask};
pub use observer::{CompositeRegistryObserver, LoggingObserver, RegistryEvent, RegistryObserver};
pub use service::RegistrationService;
pub use store::{
    InstanceRecord, InstanceRegistration, RegisterOutcome, RegistryError, RegistrySnapshot,
    RegistryStore,
};
