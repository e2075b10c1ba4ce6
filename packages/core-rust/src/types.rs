//! Identity and location types for registered service instances.
//!
//! All constructors validate their input, so a value of one of these types
//! is always well-formed. Serde goes through the same validation via
//! `try_from = "String"`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Free-form instance metadata (version tags, zones, ...).
///
/// `BTreeMap` keeps JSON output deterministic; key order carries no meaning.
pub type Metadata = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// ServiceName
// ---------------------------------------------------------------------------

/// Logical service group identifier, e.g. `PRODUCT-SERVICE`.
///
/// Case-normalized: `product-service`, ` Product-Service ` and
/// `PRODUCT-SERVICE` all parse to the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Parses and normalizes a service name.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyServiceName` for blank input and
    /// `ValidationError::InvalidServiceName` when the name contains anything
    /// other than ASCII alphanumerics, `-`, `_` or `.`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyServiceName);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ValidationError::InvalidServiceName(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// InstanceId
// ---------------------------------------------------------------------------

/// Unique identifier of one running process of a service.
///
/// Typically `host:port` or a generated UUID. Case is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Parses an instance identifier.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidInstanceId` if the id is blank,
    /// contains `/` or contains whitespace.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(ValidationError::InvalidInstanceId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstanceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstanceId> for String {
    fn from(value: InstanceId) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// InstanceAddress
// ---------------------------------------------------------------------------

/// Network location (`host:port`) that accepts proxied traffic.
///
/// IPv6 hosts use the bracketed form: `[::1]:8080`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceAddress {
    host: String,
    port: u16,
}

impl InstanceAddress {
    /// Builds an address from parts.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAddress` for an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ValidationError> {
        let host = host.into();
        if host.trim().is_empty() || port == 0 {
            return Err(ValidationError::InvalidAddress(format!("{host}:{port}")));
        }
        Ok(Self { host, port })
    }

    /// Parses `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAddress` when the port is missing,
    /// not a number in `1..=65535`, or the host is empty or malformed.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidAddress(raw.to_string());
        let trimmed = raw.trim();
        let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let bracketed = host.starts_with('[') || host.ends_with(']');
        if bracketed && !(host.starts_with('[') && host.ends_with(']') && host.len() > 2) {
            return Err(invalid());
        }
        if !bracketed && host.contains(':') {
            // Unbracketed IPv6 is ambiguous with the port separator.
            return Err(invalid());
        }
        if host.contains('/') || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Self::new(host, port).map_err(|_| invalid())
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for plain-HTTP traffic to this instance, without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for InstanceAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InstanceAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstanceAddress> for String {
    fn from(value: InstanceAddress) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// InstanceStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a registered instance.
///
/// State machine: `Starting -> Up <-> Down`, and any state `-> Expired`
/// when the lease lapses. Only `Up` instances receive traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    Expired,
}

impl InstanceStatus {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether an instance may set this status on itself.
    ///
    /// `Expired` is reserved for the expiry monitor and `Starting` only
    /// exists between registration and promotion.
    #[must_use]
    pub fn is_self_assignable(self) -> bool {
        matches!(self, Self::Up | Self::Down)
    }

    #[must_use]
    pub fn is_routable(self) -> bool {
        self == Self::Up
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STARTING" => Ok(Self::Starting),
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}
