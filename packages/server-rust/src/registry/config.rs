//! Registry lease and promotion settings.

use std::time::Duration;

/// Multiple of the heartbeat interval used when no lease is configured.
pub const DEFAULT_LEASE_MULTIPLIER: u32 = 3;

/// Configuration for the registry store and its expiry monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Cadence at which instances are expected to renew. Also the interval
    /// between expiry sweeps.
    pub heartbeat_interval: Duration,
    /// An instance whose last heartbeat is older than this is evicted.
    pub lease_duration: Duration,
    /// Renewals needed before a `Starting` instance becomes `Up`.
    /// 0 promotes at registration.
    pub heartbeats_until_up: u32,
}

impl RegistryConfig {
    /// Builds a config whose lease is the default multiple of `heartbeat_interval`.
    #[must_use]
    pub fn with_heartbeat_interval(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            lease_duration: heartbeat_interval * DEFAULT_LEASE_MULTIPLIER,
            heartbeats_until_up: 0,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::with_heartbeat_interval(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lease_is_three_heartbeats() {
        let config = RegistryConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.lease_duration, Duration::from_secs(30));
        assert_eq!(config.heartbeats_until_up, 0);
    }

    #[test]
    fn lease_follows_custom_interval() {
        let config = RegistryConfig::with_heartbeat_interval(Duration::from_secs(5));
        assert_eq!(config.lease_duration, Duration::from_secs(15));
    }
}
