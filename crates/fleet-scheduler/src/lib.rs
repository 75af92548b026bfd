//! fleet-scheduler — places pending instances on fleets.
//!
//! The [`Cache`] tracks which instances sit on which fleets, including
//! placements the [`Scheduler`] has assumed but not yet written to the
//! store. Watch events reach the cache through the [`Informer`], fed by
//! [`DiffGenerator`]s polling the store.
//!
//! ```text
//!  store ─► DiffGenerator ─► Informer ─┬─► Cache ◄── sweep
//!                                      └─► PendingQueue ─► Scheduler ─► Binder ─► store
//! ```

pub mod binder;
pub mod cache;
pub mod error;
pub mod events;
pub mod fleet_info;
pub mod generator;
pub mod informer;
pub mod predicates;
pub mod queue;
pub mod recorder;
pub mod scheduler;
pub mod scorer;
pub mod snapshot;
pub mod strategy;

pub use binder::{BindError, Binder, InstanceLister, StoreBinder};
pub use cache::Cache;
pub use error::{CacheError, CacheResult, SchedulerError, SchedulerResult};
pub use events::{ObjectEvent, WatchEvent};
pub use fleet_info::FleetInfo;
pub use generator::{DiffGenerator, ListFn, Versioned};
pub use informer::Informer;
pub use queue::PendingQueue;
pub use recorder::{ChannelRecorder, EventRecorder, EventType, LogRecorder, SchedulingEvent};
pub use scheduler::{ScheduleOutcome, Scheduler, SkipReason};
pub use snapshot::Snapshot;
pub use strategy::{CacheStrategy, DefaultStrategy};
