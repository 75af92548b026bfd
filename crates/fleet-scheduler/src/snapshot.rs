//! Point-in-time view of the cache's fleets for one scheduling pass.

use std::collections::HashMap;

use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::fleet_info::FleetInfo;

/// Shallow copy of every fleet the cache knows an object for, ordered by
/// fleet name.
///
/// A snapshot is only changed by [`Snapshot::update`]; the decision loop
/// reads it and never writes through it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    fleets: Vec<FleetInfo>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    /// Rebuild from the current contents of `cache`.
    pub fn update(&mut self, cache: &Cache) {
        cache.update_snapshot(self);
    }

    pub(crate) fn replace(&mut self, fleets: Vec<FleetInfo>) {
        self.index = fleets
            .iter()
            .enumerate()
            .map(|(i, info)| (info.name().to_string(), i))
            .collect();
        self.fleets = fleets;
    }

    pub fn list_fleets(&self) -> &[FleetInfo] {
        &self.fleets
    }

    pub fn get_fleet(&self, name: &str) -> CacheResult<&FleetInfo> {
        self.index
            .get(name)
            .map(|&i| &self.fleets[i])
            .ok_or_else(|| CacheError::FleetNotFound(name.to_string()))
    }

    pub fn num_fleets(&self) -> usize {
        self.fleets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Fleet, Instance};

    fn inst(uid: &str, fleet: &str) -> Instance {
        Instance::new(uid, "typeX").with_uid(uid).with_fleet(fleet)
    }

    #[test]
    fn lists_fleets_sorted_by_name() {
        let cache = Cache::default();
        for name in ["c", "a", "b"] {
            cache.add_fleet(&Fleet::new(name)).unwrap();
        }
        let snapshot = cache.snapshot();
        let names: Vec<&str> = snapshot.list_fleets().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(snapshot.num_fleets(), 3);
    }

    #[test]
    fn skips_fleetless_entries() {
        let cache = Cache::default();
        cache.add_fleet(&Fleet::new("known")).unwrap();
        cache.add_instance(&inst("w1", "ghost")).unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.num_fleets(), 1);
        assert!(snapshot.get_fleet("known").is_ok());
        assert_eq!(
            snapshot.get_fleet("ghost").unwrap_err(),
            CacheError::FleetNotFound("ghost".to_string())
        );
    }

    #[test]
    fn is_isolated_from_later_cache_mutation() {
        let cache = Cache::default();
        cache
            .add_fleet(&Fleet::new("C1").with_allocatable("typeX", 2))
            .unwrap();
        let snapshot = cache.snapshot();

        cache.assume_instance(&inst("w1", "C1")).unwrap();
        cache.add_fleet(&Fleet::new("C2")).unwrap();

        assert_eq!(snapshot.num_fleets(), 1);
        assert_eq!(
            snapshot.get_fleet("C1").unwrap().max_allocatable("typeX"),
            2
        );
    }

    #[test]
    fn update_reflects_new_state() {
        let cache = Cache::default();
        cache
            .add_fleet(&Fleet::new("C1").with_allocatable("typeX", 2))
            .unwrap();
        let mut snapshot = Snapshot::default();
        snapshot.update(&cache);

        cache.assume_instance(&inst("w1", "C1")).unwrap();
        cache.remove_fleet(&Fleet::new("C1")).unwrap();
        cache.add_fleet(&Fleet::new("C0")).unwrap();
        snapshot.update(&cache);

        let names: Vec<&str> = snapshot.list_fleets().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["C0"]);
        assert!(snapshot.get_fleet("C1").is_err());
    }
}
