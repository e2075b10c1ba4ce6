//! Path-prefix dispatch from inbound paths to logical service names.

use std::collections::HashSet;

use waypoint_core::messages::RouteView;
use waypoint_core::{RouteSpec, ServiceName};

use crate::config::ConfigError;

/// A validated route with its normalized prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRoute {
    pub prefix: String,
    pub service_name: ServiceName,
    pub strip_prefix: bool,
}

impl CompiledRoute {
    fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn forward_path(&self, path: &str, query: Option<&str>) -> String {
        let remainder = if self.strip_prefix && self.prefix != "/" {
            &path[self.prefix.len()..]
        } else {
            path
        };
        let remainder = if remainder.is_empty() { "/" } else { remainder };
        match query {
            Some(q) if !q.is_empty() => format!("{remainder}?{q}"),
            _ => remainder.to_string(),
        }
    }
}

/// Result of resolving an inbound path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a CompiledRoute,
    /// Path (and query) to send upstream.
    pub forward_path: String,
}

/// Ordered route list evaluated longest-prefix-first.
///
/// Matching is on whole segments: `/products` matches `/products` and
/// `/products/42` but not `/productsearch`.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    /// Configuration order, kept for display.
    routes: Vec<CompiledRoute>,
    /// Indices into `routes`, longest prefix first, ties in configuration order.
    lookup: Vec<usize>,
}

impl RouteMatcher {
    /// Validates and compiles the configured routes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRoute` for a malformed prefix and
    /// `ConfigError::DuplicateRoute` when two routes normalize to the same
    /// prefix (the second could never match).
    pub fn new(specs: &[RouteSpec]) -> Result<Self, ConfigError> {
        let mut routes = Vec::with_capacity(specs.len());
        let mut seen = HashSet::new();
        for spec in specs {
            let prefix = spec
                .normalized_prefix()
                .map_err(|source| ConfigError::InvalidRoute {
                    prefix: spec.prefix.clone(),
                    source,
                })?;
            if !seen.insert(prefix.clone()) {
                return Err(ConfigError::DuplicateRoute { prefix });
            }
            routes.push(CompiledRoute {
                prefix,
                service_name: spec.service_name.clone(),
                strip_prefix: spec.strip_prefix,
            });
        }

        let mut lookup: Vec<usize> = (0..routes.len()).collect();
        // Stable sort keeps configuration order among equal lengths.
        lookup.sort_by(|&a, &b| routes[b].prefix.len().cmp(&routes[a].prefix.len()));

        Ok(Self { routes, lookup })
    }

    /// Finds the route for `path`, if any.
    #[must_use]
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Option<RouteMatch<'_>> {
        self.lookup
            .iter()
            .map(|&idx| &self.routes[idx])
            .find(|route| route.matches(path))
            .map(|route| RouteMatch {
                route,
                forward_path: route.forward_path(path, query),
            })
    }

    #[must_use]
    pub fn routes(&self) -> &[CompiledRoute] {
        &self.routes
    }

    #[must_use]
    pub fn views(&self) -> Vec<RouteView> {
        self.routes
            .iter()
            .map(|r| RouteView {
                prefix: r.prefix.clone(),
                service_name: r.service_name.clone(),
                strip_prefix: r.strip_prefix,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(prefix: &str, service: &str) -> RouteSpec {
        RouteSpec {
            prefix: prefix.to_string(),
            service_name: ServiceName::parse(service).unwrap(),
            strip_prefix: true,
        }
    }

    fn matcher(specs: &[RouteSpec]) -> RouteMatcher {
        RouteMatcher::new(specs).unwrap()
    }

    #[test]
    fn strips_prefix_and_keeps_query() {
        let m = matcher(&[spec("/products/**", "product-service")]);
        let hit = m.resolve("/products/42", Some("expand=true")).unwrap();
        assert_eq!(hit.route.service_name.as_str(), "PRODUCT-SERVICE");
        assert_eq!(hit.forward_path, "/42?expand=true");

        let hit = m.resolve("/products", None).unwrap();
        assert_eq!(hit.forward_path, "/");
    }

    #[test]
    fn matches_whole_segments_only() {
        let m = matcher(&[spec("/products", "product-service")]);
        assert!(m.resolve("/productsearch", None).is_none());
        assert!(m.resolve("/users/1", None).is_none());
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let m = matcher(&[
            spec("/api/**", "legacy-service"),
            spec("/api/orders/**", "order-service"),
        ]);
        let hit = m.resolve("/api/orders/7", None).unwrap();
        assert_eq!(hit.route.service_name.as_str(), "ORDER-SERVICE");
        assert_eq!(hit.forward_path, "/7");

        let hit = m.resolve("/api/users", None).unwrap();
        assert_eq!(hit.route.service_name.as_str(), "LEGACY-SERVICE");
        assert_eq!(hit.forward_path, "/users");
    }

    #[test]
    fn root_route_catches_everything_and_forwards_full_path() {
        let m = matcher(&[spec("/**", "web"), spec("/users/**", "user-service")]);
        assert_eq!(
            m.resolve("/users/me", None).unwrap().route.service_name.as_str(),
            "USER-SERVICE"
        );
        let hit = m.resolve("/index.html", None).unwrap();
        assert_eq!(hit.route.service_name.as_str(), "WEB");
        assert_eq!(hit.forward_path, "/index.html");
    }

    #[test]
    fn strip_prefix_can_be_disabled() {
        let m = matcher(&[RouteSpec {
            strip_prefix: false,
            ..spec("/orders/**", "order-service")
        }]);
        assert_eq!(m.resolve("/orders/1", None).unwrap().forward_path, "/orders/1");
    }

    #[test]
    fn rejects_duplicate_and_malformed_prefixes() {
        assert!(matches!(
            RouteMatcher::new(&[spec("/a/**", "x"), spec("/a", "y")]),
            Err(ConfigError::DuplicateRoute { prefix }) if prefix == "/a"
        ));
        assert!(matches!(
            RouteMatcher::new(&[spec("a", "x")]),
            Err(ConfigError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn views_keep_configuration_order() {
        let m = matcher(&[spec("/b/**", "b"), spec("/a/long/**", "a")]);
        let prefixes: Vec<_> = m.views().into_iter().map(|v| v.prefix).collect();
        assert_eq!(prefixes, vec!["/b", "/a/long"]);
    }
}
