//! Scheduler — the decision loop placing pending instances on fleets.
//!
//! One pass per pending key:
//! - Skip instances that are gone, deleting, bound, or already assumed
//! - Refresh the snapshot from the cache
//! - Filter fleets, then pick the one with the most free capacity
//! - Assume the placement in the cache and bind it in the background
//!
//! A failed bind rolls the assumption back and re-queues the instance after
//! a delay. An instance no fleet can take is parked until fleet capacity
//! changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use fleet_core::Instance;

use crate::binder::{Binder, InstanceLister};
use crate::cache::Cache;
use crate::error::{SchedulerError, SchedulerResult};
use crate::predicates::filter_fleets;
use crate::queue::PendingQueue;
use crate::recorder::{
    EventRecorder, EventType, REASON_FAILED_BINDING, REASON_FAILED_SCHEDULING, REASON_SCHEDULED,
    SchedulingEvent,
};
use crate::scorer::select_most_available;
use crate::snapshot::Snapshot;

const DEFAULT_BIND_RETRY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Deleting,
    AlreadyBound,
    AlreadyAssumed,
}

/// Result of one scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Skipped(SkipReason),
    /// No fleet passed filtering; `message` lists the rejection counts.
    Unschedulable { message: String },
    /// The placement was assumed and its bind started.
    Assumed { fleet: String },
}

pub struct Scheduler {
    cache: Arc<Cache>,
    queue: Arc<PendingQueue>,
    lister: Arc<dyn InstanceLister>,
    binder: Arc<dyn Binder>,
    recorder: Arc<dyn EventRecorder>,
    /// Reused across passes. Held for the whole pass so passes never overlap.
    snapshot: Mutex<Option<Snapshot>>,
    bind_retry: Duration,
}

impl Scheduler {
    pub fn new(
        cache: Arc<Cache>,
        queue: Arc<PendingQueue>,
        lister: Arc<dyn InstanceLister>,
        binder: Arc<dyn Binder>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            cache,
            queue,
            lister,
            binder,
            recorder,
            snapshot: Mutex::new(None),
            bind_retry: DEFAULT_BIND_RETRY,
        }
    }

    /// Delay before an instance whose bind failed is queued again.
    pub fn with_bind_retry(mut self, delay: Duration) -> Self {
        self.bind_retry = delay;
        self
    }

    /// Run one scheduling pass for the instance with uid `key`.
    ///
    /// Returns once the placement is assumed; the bind completes in a
    /// detached task.
    pub async fn schedule_one(&self, key: &str) -> SchedulerResult<ScheduleOutcome> {
        let mut guard = self.snapshot.lock().await;

        let Some(instance) = self.lister.get_instance(key).map_err(SchedulerError::State)? else {
            return Ok(ScheduleOutcome::Skipped(SkipReason::NotFound));
        };
        if instance.is_deleting() {
            return Ok(ScheduleOutcome::Skipped(SkipReason::Deleting));
        }
        if instance.is_bound() {
            return Ok(ScheduleOutcome::Skipped(SkipReason::AlreadyBound));
        }
        if self.cache.is_assumed_instance(&instance)? {
            return Ok(ScheduleOutcome::Skipped(SkipReason::AlreadyAssumed));
        }

        let cycle = self.queue.move_cycle();
        let snapshot = guard.get_or_insert_with(Snapshot::default);
        snapshot.update(&self.cache);

        let fleets = snapshot.list_fleets();
        let filtered = filter_fleets(&instance, fleets);
        let Some((best, free)) =
            select_most_available(&filtered.feasible, &instance.spec.resource_class)
        else {
            let message = filtered.summary(fleets.len());
            debug!(instance = %key, %message, "no feasible fleet");
            self.recorder.record(SchedulingEvent::new(
                &instance,
                EventType::Normal,
                REASON_FAILED_SCHEDULING,
                message.clone(),
            ));
            self.queue.mark_unschedulable(key, cycle);
            return Ok(ScheduleOutcome::Unschedulable { message });
        };

        let fleet = best.name().to_string();
        let mut assumed = instance;
        assumed.spec.fleet_name = fleet.clone();
        self.cache.assume_instance(&assumed)?;
        debug!(
            instance = %key,
            %fleet,
            free,
            feasible = filtered.feasible.len(),
            "placement assumed"
        );

        self.spawn_bind(assumed);
        Ok(ScheduleOutcome::Assumed { fleet })
    }

    fn spawn_bind(&self, assumed: Instance) {
        let cache = self.cache.clone();
        let queue = self.queue.clone();
        let binder = self.binder.clone();
        let recorder = self.recorder.clone();
        let retry = self.bind_retry;

        tokio::spawn(async move {
            let fleet = assumed.spec.fleet_name.clone();
            match binder.bind(&assumed, &fleet).await {
                Ok(()) => {
                    if let Err(e) = cache.finish_binding(&assumed) {
                        warn!(instance = %assumed.meta.uid, error = %e, "finish_binding failed");
                    }
                    recorder.record(SchedulingEvent::new(
                        &assumed,
                        EventType::Normal,
                        REASON_SCHEDULED,
                        format!("Successfully assigned {} to {fleet}", assumed.meta.name),
                    ));
                }
                Err(e) => {
                    error!(
                        instance = %assumed.meta.uid,
                        %fleet,
                        error = %e,
                        "bind failed, forgetting assumed placement"
                    );
                    if let Err(e) = cache.forget_instance(&assumed) {
                        warn!(instance = %assumed.meta.uid, error = %e, "forget_instance failed");
                    }
                    recorder.record(SchedulingEvent::new(
                        &assumed,
                        EventType::Warning,
                        REASON_FAILED_BINDING,
                        format!("Binding to {fleet} failed: {e}"),
                    ));
                    queue.add_after(&assumed.meta.uid, retry);
                }
            }
        });
    }

    /// Process pending keys one at a time until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        loop {
            tokio::select! {
                key = self.queue.pop() => {
                    let Some(key) = key else {
                        break;
                    };
                    match self.schedule_one(&key).await {
                        Ok(outcome) => debug!(instance = %key, ?outcome, "scheduling pass done"),
                        Err(SchedulerError::State(e)) => {
                            warn!(instance = %key, error = %e, "store read failed, retrying later");
                            self.queue.add_after(&key, self.bind_retry);
                        }
                        Err(e) => warn!(instance = %key, error = %e, "scheduling pass aborted"),
                    }
                    self.queue.done(&key);
                }
                _ = shutdown.changed() => {
                    self.queue.shut_down();
                    break;
                }
            }
        }
        info!("scheduler stopped");
    }
}
