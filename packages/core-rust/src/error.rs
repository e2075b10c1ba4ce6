/// Rejections produced while parsing identity types, route specs and
/// registration payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),
    #[error("invalid instance id: {0:?}")]
    InvalidInstanceId(String),
    #[error("invalid address {0:?}, expected host:port")]
    InvalidAddress(String),
    #[error("invalid instance status: {0:?}")]
    InvalidStatus(String),
    #[error("status {0} cannot be set by an instance")]
    StatusNotAssignable(crate::InstanceStatus),
    #[error("invalid route prefix {0:?}, must start with '/'")]
    InvalidRoutePrefix(String),
}
