//! Instance selection policies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use waypoint_core::ServiceName;

use super::config::SelectionPolicyKind;

/// Chooses which of `candidates` instances serves the first attempt of a
/// request.
pub trait SelectionPolicy: Send + Sync {
    /// Returns an index in `0..candidates`. `candidates` is never zero.
    fn select(&self, service_name: &ServiceName, candidates: usize) -> usize;
}

/// Builds the policy named in configuration.
#[must_use]
pub fn build_policy(kind: SelectionPolicyKind) -> Arc<dyn SelectionPolicy> {
    match kind {
        SelectionPolicyKind::RoundRobin => Arc::new(RoundRobinPolicy::default()),
        SelectionPolicyKind::Random => Arc::new(RandomPolicy),
    }
}

/// Cycles through instances with one cursor per service.
///
/// The cursor advances on every selection, so over `N` consecutive
/// requests against an unchanged set of `N` instances each is picked once.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursors: DashMap<ServiceName, AtomicUsize>,
}

impl SelectionPolicy for RoundRobinPolicy {
    fn select(&self, service_name: &ServiceName, candidates: usize) -> usize {
        let next = if let Some(cursor) = self.cursors.get(service_name) {
            cursor.fetch_add(1, Ordering::Relaxed)
        } else {
            self.cursors
                .entry(service_name.clone())
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed)
        };
        next % candidates
    }
}

/// Picks uniformly at random.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPolicy;

impl SelectionPolicy for RandomPolicy {
    fn select(&self, _service_name: &ServiceName, candidates: usize) -> usize {
        rand::rng().random_range(0..candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn name(raw: &str) -> ServiceName {
        ServiceName::parse(raw).unwrap()
    }

    #[test]
    fn round_robin_visits_each_instance_once_per_cycle() {
        let policy = RoundRobinPolicy::default();
        let service = name("products");
        let picks: Vec<usize> = (0..6).map(|_| policy.select(&service, 3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn round_robin_cursors_are_per_service() {
        let policy = RoundRobinPolicy::default();
        assert_eq!(policy.select(&name("a"), 2), 0);
        assert_eq!(policy.select(&name("a"), 2), 1);
        assert_eq!(policy.select(&name("b"), 2), 0);
    }

    #[test]
    fn random_stays_in_range() {
        let policy = RandomPolicy;
        let service = name("products");
        let seen: HashSet<usize> = (0..200).map(|_| policy.select(&service, 4)).collect();
        assert!(seen.iter().all(|&i| i < 4));
        assert!(seen.len() > 1);
    }

    #[test]
    fn concurrent_round_robin_is_evenly_spread() {
        let policy = Arc::new(RoundRobinPolicy::default());
        let service = name("products");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let policy = Arc::clone(&policy);
                let service = service.clone();
                std::thread::spawn(move || {
                    (0..300).map(|_| policy.select(&service, 3)).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut counts = [0usize; 3];
        for handle in handles {
            for pick in handle.join().unwrap() {
                counts[pick] += 1;
            }
        }
        assert_eq!(counts, [400, 400, 400]);
    }
}
