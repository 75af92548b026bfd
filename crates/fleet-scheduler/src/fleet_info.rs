//! Per-fleet aggregate held by the cache.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::{Fleet, Instance};

/// A fleet plus the instances the cache believes are placed on it.
///
/// The fleet object may be absent: an instance can be filed under a fleet
/// key before the fleet itself has been observed. Such entries are never
/// offered as scheduling targets.
///
/// Cloning is shallow. Instance and fleet objects are shared through
/// `Arc`; only the maps are copied.
#[derive(Debug, Clone, Default)]
pub struct FleetInfo {
    fleet: Option<Arc<Fleet>>,
    instances: HashMap<String, Arc<Instance>>,
    /// Resource class → number of tracked instances of that class.
    requested: HashMap<String, i64>,
}

impl FleetInfo {
    pub fn new(fleet: Fleet) -> Self {
        Self {
            fleet: Some(Arc::new(fleet)),
            ..Self::default()
        }
    }

    pub fn fleet(&self) -> Option<&Fleet> {
        self.fleet.as_deref()
    }

    /// Name of the fleet, or empty when only known through instances.
    pub fn name(&self) -> &str {
        self.fleet.as_deref().map_or("", Fleet::name)
    }

    pub(crate) fn set_fleet(&mut self, fleet: Fleet) {
        self.fleet = Some(Arc::new(fleet));
    }

    pub(crate) fn clear_fleet(&mut self) {
        self.fleet = None;
    }

    /// File an instance under `key`, replacing any previous entry.
    pub(crate) fn add_instance(&mut self, key: &str, instance: Arc<Instance>) {
        self.remove_instance(key);
        *self
            .requested
            .entry(instance.spec.resource_class.clone())
            .or_insert(0) += 1;
        self.instances.insert(key.to_string(), instance);
    }

    /// Drop the instance filed under `key`. Returns false if absent.
    pub(crate) fn remove_instance(&mut self, key: &str) -> bool {
        let Some(old) = self.instances.remove(key) else {
            return false;
        };
        let class = &old.spec.resource_class;
        if let Some(count) = self.requested.get_mut(class) {
            *count -= 1;
            if *count <= 0 {
                self.requested.remove(class);
            }
        }
        true
    }

    pub fn contains_instance(&self, key: &str) -> bool {
        self.instances.contains_key(key)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }

    /// Tracked instances requesting `class`.
    pub fn requested(&self, class: &str) -> i64 {
        self.requested.get(class).copied().unwrap_or(0)
    }

    /// Units of `class` still free: declared allocatable minus tracked
    /// instances of that class, never below zero.
    pub fn max_allocatable(&self, class: &str) -> i64 {
        let declared = self.fleet().map_or(0, |f| f.allocatable(class));
        (declared - self.requested(class)).max(0)
    }
}
