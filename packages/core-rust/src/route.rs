//! Path-prefix routes.
//!
//! A route binds a path prefix to a logical service name. Prefixes may be
//! written in the ant-style form used by gateway configs (`/products/**`);
//! the wildcard suffix is cosmetic and normalized away.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::ServiceName;

/// One configured `(prefix, serviceName)` binding as it appears in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Path prefix, e.g. `/products/**`.
    pub prefix: String,

    /// Target logical service.
    pub service_name: ServiceName,

    /// Whether the matched prefix is removed before forwarding.
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: bool,
}

fn default_strip_prefix() -> bool {
    true
}

impl RouteSpec {
    /// Parses the compact CLI form `PREFIX=SERVICE`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when the `=` separator is missing, the
    /// prefix is malformed or the service name is invalid.
    pub fn parse_pair(raw: &str) -> Result<Self, ValidationError> {
        let (prefix, service) = raw
            .split_once('=')
            .ok_or_else(|| ValidationError::InvalidRoutePrefix(raw.to_string()))?;
        let spec = Self {
            prefix: prefix.trim().to_string(),
            service_name: ServiceName::parse(service)?,
            strip_prefix: true,
        };
        spec.normalized_prefix()?;
        Ok(spec)
    }

    /// Returns the prefix with wildcard suffix and trailing slashes removed.
    ///
    /// `/products/**`, `/products/*`, `/products/` and `/products` all
    /// normalize to `/products`; `/`, `/*` and `/**` normalize to `/`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidRoutePrefix` if the prefix does not
    /// start with `/` or contains wildcards anywhere but the end.
    pub fn normalized_prefix(&self) -> Result<String, ValidationError> {
        normalize_prefix(&self.prefix)
    }
}

/// Normalizes a route prefix. See [`RouteSpec::normalized_prefix`].
///
/// # Errors
///
/// Returns `ValidationError::InvalidRoutePrefix` for malformed prefixes.
pub fn normalize_prefix(raw: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidRoutePrefix(raw.to_string());
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return Err(invalid());
    }

    let without_wildcard = trimmed
        .strip_suffix("/**")
        .or_else(|| trimmed.strip_suffix("/*"))
        .unwrap_or(trimmed);
    if without_wildcard.contains('*') || without_wildcard.contains('?') {
        return Err(invalid());
    }

    let normalized = without_wildcard.trim_end_matches('/');
    if normalized.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(normalized.to_string())
    }
}
