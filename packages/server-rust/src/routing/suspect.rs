//! Short-lived record of instances that recently failed a request.
//!
//! A suspect is still routable; it is only passed over while a healthy
//! alternative exists. Marks lapse after the cooldown or are cleared by the
//! next successful request.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use waypoint_core::InstanceId;

#[derive(Debug)]
pub struct SuspectList {
    cooldown: Duration,
    marks: DashMap<InstanceId, Instant>,
}

impl SuspectList {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            marks: DashMap::new(),
        }
    }

    /// Marks `instance_id` as suspect from now until the cooldown elapses.
    pub fn mark(&self, instance_id: &InstanceId) {
        self.marks.insert(instance_id.clone(), Instant::now());
    }

    pub fn clear(&self, instance_id: &InstanceId) {
        self.marks.remove(instance_id);
    }

    #[must_use]
    pub fn is_suspect(&self, instance_id: &InstanceId) -> bool {
        let cooldown = self.cooldown;
        let lapsed = match self.marks.get(instance_id) {
            Some(marked) => marked.elapsed() >= cooldown,
            None => return false,
        };
        if lapsed {
            self.marks
                .remove_if(instance_id, |_, marked| marked.elapsed() >= cooldown);
        }
        !lapsed
    }

    /// Instances currently suspect, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<InstanceId> {
        let cooldown = self.cooldown;
        self.marks.retain(|_, marked| marked.elapsed() < cooldown);
        let mut ids: Vec<InstanceId> = self.marks.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
