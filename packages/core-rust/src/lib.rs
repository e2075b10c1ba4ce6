//! Waypoint core: service identity types, registration messages and route definitions.

pub mod error;
pub mod messages;
pub mod route;
pub mod types;

pub use error::ValidationError;
pub use route::{normalize_prefix, RouteSpec};
pub use types::{InstanceAddress, InstanceId, InstanceStatus, Metadata, ServiceName};

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn service_name_parse_is_idempotent(raw in "[a-zA-Z0-9._-]{1,24}") {
            let once = ServiceName::parse(&raw).unwrap();
            let twice = ServiceName::parse(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalized_prefix_is_a_fixed_point(segments in proptest::collection::vec("[a-z0-9]{1,8}", 0..4)) {
            let raw = format!("/{}/**", segments.join("/"));
            let normalized = normalize_prefix(&raw).unwrap();
            prop_assert_eq!(normalize_prefix(&normalized).unwrap(), normalized);
        }
    }
}
