//! Routes watch events into the cache and the pending queue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use fleet_core::{Fleet, Instance};

use crate::cache::Cache;
use crate::error::CacheError;
use crate::events::{ObjectEvent, WatchEvent};
use crate::queue::PendingQueue;

pub struct Informer {
    cache: Arc<Cache>,
    queue: Arc<PendingQueue>,
}

impl Informer {
    pub fn new(cache: Arc<Cache>, queue: Arc<PendingQueue>) -> Self {
        Self { cache, queue }
    }

    pub fn handle(&self, event: WatchEvent) {
        match event {
            WatchEvent::Fleet(ev) => self.handle_fleet(ev),
            WatchEvent::Instance(ev) => self.handle_instance(ev),
        }
    }

    fn handle_fleet(&self, event: ObjectEvent<Fleet>) {
        let kind = event.kind();
        let result = match &event {
            ObjectEvent::Added(fleet) => self.cache.add_fleet(fleet),
            ObjectEvent::Updated { old, new } => self.cache.update_fleet(old, new),
            ObjectEvent::Removed(fleet) => self.cache.remove_fleet(fleet),
        };
        if let Err(e) = result {
            warn!(fleet = %event.latest().name(), event = kind, error = %e, "cache rejected fleet event");
            return;
        }
        // New or changed capacity may fit instances that did not fit before.
        if !matches!(event, ObjectEvent::Removed(_)) {
            self.queue.move_unschedulable_to_active();
        }
    }

    fn handle_instance(&self, event: ObjectEvent<Instance>) {
        let kind = event.kind();
        let uid = event.latest().meta.uid.clone();
        let result = match event {
            ObjectEvent::Added(inst) => {
                if inst.is_bound() {
                    self.cache.add_instance(&inst)
                } else {
                    self.enqueue_pending(&inst);
                    Ok(())
                }
            }
            ObjectEvent::Updated { old, new } => match (old.is_bound(), new.is_bound()) {
                (false, true) => self.cache.add_instance(&new),
                (true, true) => self.refresh_bound(&old, &new),
                // A bound instance losing its fleet breaks a cache invariant; the
                // cache panics and the daemon aborts.
                (true, false) => self.cache.update_instance(&old, &new),
                (false, false) => {
                    self.enqueue_pending(&new);
                    Ok(())
                }
            },
            ObjectEvent::Removed(inst) => {
                self.queue.forget(&inst.meta.uid);
                if inst.is_bound() {
                    self.cache.remove_instance(&inst)
                } else {
                    Ok(())
                }
            }
        };
        if let Err(e) = result {
            warn!(instance = %uid, event = kind, error = %e, "cache rejected instance event");
        }
    }

    /// Update a bound instance, confirming it instead when the cache only
    /// holds an assumption or has already swept it.
    fn refresh_bound(&self, old: &Instance, new: &Instance) -> Result<(), CacheError> {
        match self.cache.update_instance(old, new) {
            Err(CacheError::StillAssumed(_) | CacheError::InstanceNotFound(_)) => {
                debug!(instance = %new.meta.uid, "bound update treated as confirmation");
                self.cache.add_instance(new)
            }
            other => other,
        }
    }

    fn enqueue_pending(&self, inst: &Instance) {
        if inst.is_deleting() {
            self.queue.forget(&inst.meta.uid);
            return;
        }
        self.queue.add(&inst.meta.uid);
    }

    /// Consume instance and fleet events until both streams end or
    /// `shutdown` fires.
    pub async fn run(
        &self,
        mut instances: mpsc::Receiver<WatchEvent>,
        mut fleets: mpsc::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("informer started");
        let mut instances_open = true;
        let mut fleets_open = true;
        while instances_open || fleets_open {
            tokio::select! {
                ev = fleets.recv(), if fleets_open => match ev {
                    Some(ev) => self.handle(ev),
                    None => fleets_open = false,
                },
                ev = instances.recv(), if instances_open => match ev {
                    Some(ev) => self.handle(ev),
                    None => instances_open = false,
                },
                _ = shutdown.changed() => {
                    info!("informer shutting down");
                    return;
                }
            }
        }
        info!("watch streams closed, informer stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Informer, Arc<Cache>, Arc<PendingQueue>) {
        let cache = Arc::new(Cache::default());
        let queue = Arc::new(PendingQueue::new());
        (Informer::new(cache.clone(), queue.clone()), cache, queue)
    }

    fn fleet(name: &str, units: i64) -> Fleet {
        Fleet::new(name).with_allocatable("typeX", units)
    }

    fn pending(uid: &str) -> Instance {
        Instance::new(uid, "typeX").with_uid(uid)
    }

    fn added<T>(obj: T) -> ObjectEvent<T> {
        ObjectEvent::Added(obj)
    }

    #[test]
    fn unbound_instance_is_enqueued() {
        let (informer, cache, queue) = setup();
        informer.handle(added(pending("w1")).into());
        assert_eq!(queue.len(), 1);
        assert_eq!(cache.instance_count(), 0);
    }

    #[test]
    fn deleting_instance_is_not_enqueued() {
        let (informer, _cache, queue) = setup();
        let mut inst = pending("w1");
        inst.meta.deletion_timestamp = Some(1);
        informer.handle(added(inst).into());
        assert!(queue.is_empty());
    }

    #[test]
    fn bound_instance_goes_to_cache() {
        let (informer, cache, queue) = setup();
        informer.handle(added(fleet("C1", 2)).into());
        informer.handle(added(pending("w1").with_fleet("C1")).into());
        assert!(queue.is_empty());
        assert_eq!(cache.max_allocatable("C1", "typeX"), Some(1));
    }

    #[test]
    fn bind_update_confirms_assumption() {
        let (informer, cache, _queue) = setup();
        informer.handle(added(fleet("C1", 2)).into());
        let bound = pending("w1").with_fleet("C1");
        cache.assume_instance(&bound).unwrap();

        informer.handle(
            ObjectEvent::Updated {
                old: pending("w1"),
                new: bound.clone(),
            }
            .into(),
        );
        assert!(!cache.is_assumed_instance(&bound).unwrap());
        assert_eq!(cache.max_allocatable("C1", "typeX"), Some(1));
    }

    #[test]
    fn bound_update_after_sweep_reinserts() {
        let (informer, cache, _queue) = setup();
        informer.handle(added(fleet("C1", 2)).into());
        let bound = pending("w1").with_fleet("C1");

        informer.handle(
            ObjectEvent::Updated {
                old: bound.clone(),
                new: bound.clone(),
            }
            .into(),
        );
        assert_eq!(cache.instance_count(), 1);
        assert_eq!(cache.max_allocatable("C1", "typeX"), Some(1));
    }

    #[test]
    fn removal_forgets_queue_entry_and_cache_entry() {
        let (informer, cache, queue) = setup();
        informer.handle(added(fleet("C1", 2)).into());
        informer.handle(added(pending("w1")).into());
        informer.handle(ObjectEvent::Removed(pending("w1")).into());
        assert!(queue.is_empty());

        let bound = pending("w2").with_fleet("C1");
        informer.handle(added(bound.clone()).into());
        informer.handle(ObjectEvent::Removed(bound).into());
        assert_eq!(cache.instance_count(), 0);
        assert_eq!(cache.max_allocatable("C1", "typeX"), Some(2));
    }

    #[test]
    fn fleet_events_requeue_unschedulable() {
        let (informer, cache, queue) = setup();
        queue.mark_unschedulable("w1", queue.move_cycle());

        informer.handle(added(fleet("C1", 1)).into());
        assert_eq!(queue.len(), 1);
        assert_eq!(cache.snapshot().num_fleets(), 1);

        informer.handle(ObjectEvent::Removed(fleet("C1", 1)).into());
        assert_eq!(cache.fleet_count(), 0);
    }

    #[test]
    fn cache_errors_do_not_stop_processing() {
        let (informer, cache, _queue) = setup();
        informer.handle(ObjectEvent::Removed(fleet("C9", 1)).into());
        informer.handle(added(fleet("C1", 1)).into());
        assert_eq!(cache.fleet_count(), 1);
    }

    #[tokio::test]
    async fn run_drains_both_streams() {
        let (informer, cache, queue) = setup();
        let (fleet_tx, fleet_rx) = mpsc::channel(4);
        let (inst_tx, inst_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        fleet_tx.send(added(fleet("C1", 1)).into()).await.unwrap();
        inst_tx.send(added(pending("w1")).into()).await.unwrap();
        drop(fleet_tx);
        drop(inst_tx);

        informer.run(inst_rx, fleet_rx, shutdown).await;
        assert_eq!(cache.fleet_count(), 1);
        assert_eq!(queue.len(), 1);
    }
}
