//! Scheduler cache — the in-memory record of where instances are placed.
//!
//! The decision loop places an instance optimistically ("assume") before
//! the binding is written to the store, so later passes already see the
//! consumed capacity. The watch stream eventually confirms the placement
//! (`add_instance`), or a failed bind rolls it back (`forget_instance`).
//!
//! ```text
//!   assume ──► finish_binding ──► sweep removes entry ──► watch add reinserts
//!     │                 ▲
//!     │                 └── watch add may confirm at any point in between
//!     └──► forget (bind failed)
//! ```
//!
//! # Invariants
//!
//! - An instance key is filed under at most one fleet at a time.
//! - The fleet key recorded for an instance always equals the fleet it is
//!   filed under.
//!
//! A watch-driven update or remove that disagrees with the recorded fleet
//! means the event stream and the cache have diverged. No local repair can
//! be trusted at that point, so those paths panic instead of returning an
//! error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_core::{Fleet, Instance};

use crate::error::{CacheError, CacheResult};
use crate::fleet_info::FleetInfo;
use crate::snapshot::Snapshot;
use crate::strategy::{CacheStrategy, DefaultStrategy};

/// Bookkeeping for one instance known to the cache.
#[derive(Debug)]
struct InstanceState {
    instance: Arc<Instance>,
    /// Fleet key the instance is filed under.
    fleet_key: String,
    /// Set once the durable bind for an assumed instance succeeded.
    binding_finished: AtomicBool,
}

impl InstanceState {
    fn new(instance: Arc<Instance>, fleet_key: String) -> Self {
        Self {
            instance,
            fleet_key,
            binding_finished: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    fleets: HashMap<String, FleetInfo>,
    instance_states: HashMap<String, InstanceState>,
    assumed: HashSet<String>,
}

impl CacheState {
    fn file_instance(&mut self, fleet_key: &str, key: &str, instance: Arc<Instance>) {
        self.fleets
            .entry(fleet_key.to_string())
            .or_default()
            .add_instance(key, instance);
    }

    /// Remove `key` from the fleet it is filed under, dropping the fleet
    /// entry when it is left with neither a fleet object nor instances.
    fn unfile_instance(&mut self, fleet_key: &str, key: &str) {
        let Some(info) = self.fleets.get_mut(fleet_key) else {
            panic!("instance {key} is recorded on fleet {fleet_key:?} but that fleet is not cached");
        };
        if !info.remove_instance(key) {
            panic!("instance {key} is recorded on fleet {fleet_key:?} but is not filed there");
        }
        if info.fleet().is_none() && !info.has_instances() {
            self.fleets.remove(fleet_key);
        }
    }

    fn forget_key(&mut self, key: &str) {
        let Some(state) = self.instance_states.remove(key) else {
            return;
        };
        self.unfile_instance(&state.fleet_key, key);
        self.assumed.remove(key);
    }
}

/// Lock-protected record of fleets and instance placements.
pub struct Cache {
    strategy: Box<dyn CacheStrategy>,
    state: RwLock<CacheState>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(Box::new(DefaultStrategy))
    }
}

impl Cache {
    pub fn new(strategy: Box<dyn CacheStrategy>) -> Self {
        Self {
            strategy,
            state: RwLock::new(CacheState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().expect("scheduler cache lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().expect("scheduler cache lock poisoned")
    }

    // ── Fleets ─────────────────────────────────────────────────────

    pub fn add_fleet(&self, fleet: &Fleet) -> CacheResult<()> {
        let key = fleet_key(fleet)?;
        let mut state = self.write();
        state
            .fleets
            .entry(key.to_string())
            .or_default()
            .set_fleet(fleet.clone());
        debug!(fleet = %key, "fleet added to cache");
        Ok(())
    }

    pub fn update_fleet(&self, _old: &Fleet, new: &Fleet) -> CacheResult<()> {
        let key = fleet_key(new)?;
        let mut state = self.write();
        state
            .fleets
            .entry(key.to_string())
            .or_default()
            .set_fleet(new.clone());
        debug!(fleet = %key, "fleet updated in cache");
        Ok(())
    }

    /// Forget the fleet object. The entry survives while instances are
    /// still filed under it.
    pub fn remove_fleet(&self, fleet: &Fleet) -> CacheResult<()> {
        let key = fleet_key(fleet)?;
        let mut state = self.write();
        let Some(info) = state.fleets.get_mut(key) else {
            return Err(CacheError::FleetNotFound(key.to_string()));
        };
        info.clear_fleet();
        if !info.has_instances() {
            state.fleets.remove(key);
        }
        debug!(fleet = %key, "fleet removed from cache");
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Record a placement confirmed by the watch stream.
    ///
    /// Confirms an assumed instance, or inserts one the cache has never
    /// seen (or already swept). Adding a confirmed instance twice is an
    /// error.
    pub fn add_instance(&self, instance: &Instance) -> CacheResult<()> {
        let key = self.strategy.key(instance)?;
        let fleet = self.strategy.fleet_key(instance);
        if fleet.is_empty() {
            return Err(CacheError::Unbound(key));
        }

        let mut state = self.write();
        let shared = Arc::new(instance.clone());

        if state.assumed.contains(&key) {
            let recorded = state
                .instance_states
                .get(&key)
                .map(|s| s.fleet_key.clone())
                .unwrap_or_else(|| panic!("assumed instance {key} has no state"));
            if recorded != fleet {
                warn!(
                    instance = %key,
                    assumed_fleet = %recorded,
                    confirmed_fleet = %fleet,
                    "instance confirmed on a different fleet than assumed"
                );
            }
            state.unfile_instance(&recorded, &key);
            state.file_instance(&fleet, &key, shared.clone());
            state
                .instance_states
                .insert(key.clone(), InstanceState::new(shared, fleet.clone()));
            state.assumed.remove(&key);
            debug!(instance = %key, %fleet, "assumed instance confirmed");
            return Ok(());
        }

        if state.instance_states.contains_key(&key) {
            return Err(CacheError::AlreadyAdded(key));
        }

        state.file_instance(&fleet, &key, shared.clone());
        state
            .instance_states
            .insert(key.clone(), InstanceState::new(shared, fleet.clone()));
        debug!(instance = %key, %fleet, "instance added to cache");
        Ok(())
    }

    /// Replace the stored object of a confirmed instance.
    ///
    /// # Panics
    ///
    /// If `new` is bound to a different fleet than the one recorded.
    pub fn update_instance(&self, old: &Instance, new: &Instance) -> CacheResult<()> {
        let key = self.strategy.key(old)?;
        let new_fleet = self.strategy.fleet_key(new);

        let mut state = self.write();
        let Some(current) = state.instance_states.get(&key) else {
            return Err(CacheError::InstanceNotFound(key));
        };
        if state.assumed.contains(&key) {
            return Err(CacheError::StillAssumed(key));
        }
        if current.fleet_key != new_fleet {
            panic!(
                "instance {key} moved from fleet {:?} to {new_fleet:?} without remove/add; \
                 scheduler cache is corrupted",
                current.fleet_key
            );
        }

        let shared = Arc::new(new.clone());
        state.file_instance(&new_fleet, &key, shared.clone());
        state
            .instance_states
            .insert(key.clone(), InstanceState::new(shared, new_fleet));
        debug!(instance = %key, "instance updated in cache");
        Ok(())
    }

    /// Drop an instance the watch stream reports as deleted.
    ///
    /// # Panics
    ///
    /// If the instance is bound to a different fleet than the one recorded.
    pub fn remove_instance(&self, instance: &Instance) -> CacheResult<()> {
        let key = self.strategy.key(instance)?;
        let fleet = self.strategy.fleet_key(instance);

        let mut state = self.write();
        let Some(current) = state.instance_states.get(&key) else {
            return Err(CacheError::InstanceNotFound(key));
        };
        if current.fleet_key != fleet {
            panic!(
                "instance {key} removed from fleet {fleet:?} but recorded on {:?}; \
                 scheduler cache is corrupted",
                current.fleet_key
            );
        }
        state.forget_key(&key);
        debug!(instance = %key, %fleet, "instance removed from cache");
        Ok(())
    }

    /// Optimistically place an instance before its binding is written.
    ///
    /// Only instances the cache has never seen can be assumed.
    pub fn assume_instance(&self, instance: &Instance) -> CacheResult<()> {
        let key = self.strategy.key(instance)?;
        let fleet = self.strategy.fleet_key(instance);
        if fleet.is_empty() {
            return Err(CacheError::Unbound(key));
        }

        let mut state = self.write();
        if state.instance_states.contains_key(&key) {
            return Err(CacheError::AlreadyKnown(key));
        }
        let shared = Arc::new(instance.clone());
        state.file_instance(&fleet, &key, shared.clone());
        state
            .instance_states
            .insert(key.clone(), InstanceState::new(shared, fleet.clone()));
        state.assumed.insert(key.clone());
        debug!(instance = %key, %fleet, "instance assumed");
        Ok(())
    }

    /// Roll back an assumption after its binding failed.
    ///
    /// # Panics
    ///
    /// If `instance` names a different fleet than the one it was assumed on.
    pub fn forget_instance(&self, instance: &Instance) -> CacheResult<()> {
        let key = self.strategy.key(instance)?;
        let fleet = self.strategy.fleet_key(instance);

        let mut state = self.write();
        if !state.assumed.contains(&key) {
            return Err(CacheError::NotAssumed(key));
        }
        let recorded = state
            .instance_states
            .get(&key)
            .map(|s| s.fleet_key.as_str())
            .unwrap_or_else(|| panic!("assumed instance {key} has no state"));
        if recorded != fleet {
            panic!(
                "instance {key} forgotten on fleet {fleet:?} but assumed on {recorded:?}; \
                 scheduler cache is corrupted"
            );
        }
        state.forget_key(&key);
        debug!(instance = %key, %fleet, "assumed instance forgotten");
        Ok(())
    }

    /// Mark the binding of an assumed instance as written.
    ///
    /// The entry stays until the next sweep so a watch confirmation can
    /// still supersede it. Only takes the read lock.
    pub fn finish_binding(&self, instance: &Instance) -> CacheResult<()> {
        let key = self.strategy.key(instance)?;
        let state = self.read();
        match state.instance_states.get(&key) {
            Some(s) if state.assumed.contains(&key) => {
                s.binding_finished.store(true, Ordering::Release);
                debug!(instance = %key, "binding finished");
            }
            _ => debug!(instance = %key, "finish_binding on instance that is no longer assumed"),
        }
        Ok(())
    }

    pub fn is_assumed_instance(&self, instance: &Instance) -> CacheResult<bool> {
        let key = self.strategy.key(instance)?;
        Ok(self.read().assumed.contains(&key))
    }

    // ── Expiry sweep ───────────────────────────────────────────────

    /// Remove every assumed instance whose binding has finished.
    ///
    /// Returns how many entries were removed. Assumptions with a bind still
    /// in flight are left alone.
    pub fn cleanup_assumed_instances(&self) -> usize {
        let mut state = self.write();
        let finished: Vec<String> = state
            .assumed
            .iter()
            .filter(|key| {
                state
                    .instance_states
                    .get(*key)
                    .unwrap_or_else(|| panic!("assumed instance {key} has no state"))
                    .binding_finished
                    .load(Ordering::Acquire)
            })
            .cloned()
            .collect();

        for key in &finished {
            state.forget_key(key);
            debug!(instance = %key, "expired bound assumption");
        }
        finished.len()
    }

    /// Run the expiry sweep every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "cache sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let removed = self.cleanup_assumed_instances();
                    if removed > 0 {
                        debug!(removed, "cache sweep removed bound assumptions");
                    }
                }
                _ = shutdown.changed() => {
                    info!("cache sweep shutting down");
                    break;
                }
            }
        }
    }

    // ── Snapshots and read helpers ─────────────────────────────────

    /// Build a fresh snapshot of every fleet with a known fleet object.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        self.update_snapshot(&mut snapshot);
        snapshot
    }

    /// Refill `snapshot` from the current cache contents.
    pub fn update_snapshot(&self, snapshot: &mut Snapshot) {
        let state = self.read();
        let mut fleets: Vec<FleetInfo> = state
            .fleets
            .values()
            .filter(|info| info.fleet().is_some())
            .cloned()
            .collect();
        drop(state);
        fleets.sort_by(|a, b| a.name().cmp(b.name()));
        snapshot.replace(fleets);
    }

    pub fn fleet_count(&self) -> usize {
        self.read().fleets.len()
    }

    pub fn instance_count(&self) -> usize {
        self.read().instance_states.len()
    }

    pub fn assumed_count(&self) -> usize {
        self.read().assumed.len()
    }

    /// Free units of `class` on `fleet`, or `None` if the fleet is unknown.
    pub fn max_allocatable(&self, fleet: &str, class: &str) -> Option<i64> {
        self.read().fleets.get(fleet).map(|f| f.max_allocatable(class))
    }

    /// Fleet key the instance is currently filed under.
    pub fn instance_fleet(&self, instance: &Instance) -> CacheResult<Option<String>> {
        let key = self.strategy.key(instance)?;
        Ok(self
            .read()
            .instance_states
            .get(&key)
            .map(|s| s.fleet_key.clone()))
    }

    /// Last object stored for the instance.
    pub fn get_instance(&self, instance: &Instance) -> CacheResult<Option<Instance>> {
        let key = self.strategy.key(instance)?;
        Ok(self
            .read()
            .instance_states
            .get(&key)
            .map(|s| s.instance.as_ref().clone()))
    }

    /// Number of fleet entries holding `key`. Used to check that an
    /// instance is never filed twice.
    pub fn placements_of(&self, key: &str) -> usize {
        self.read()
            .fleets
            .values()
            .filter(|f| f.contains_instance(key))
            .count()
    }
}

fn fleet_key(fleet: &Fleet) -> CacheResult<&str> {
    if fleet.meta.name.is_empty() {
        return Err(CacheError::MissingFleetName);
    }
    Ok(&fleet.meta.name)
}
