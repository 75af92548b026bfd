//! Scheduler error types.

use thiserror::Error;

use fleet_state::StateError;

/// Errors returned by [`Cache`](crate::cache::Cache) and
/// [`Snapshot`](crate::snapshot::Snapshot) operations.
///
/// These cover bad input and protocol misuse. Bookkeeping corruption is
/// never returned as an error: it panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("instance {name:?} has no uid")]
    MissingUid { name: String },

    #[error("fleet has no name")]
    MissingFleetName,

    #[error("instance {0} is not bound to a fleet")]
    Unbound(String),

    #[error("instance {0} is already known to the cache")]
    AlreadyKnown(String),

    #[error("instance {0} was already added")]
    AlreadyAdded(String),

    #[error("instance {0} is still assumed and must be confirmed first")]
    StillAssumed(String),

    #[error("instance {0} is not assumed")]
    NotAssumed(String),

    #[error("instance {0} not found in cache")]
    InstanceNotFound(String),

    #[error("fleet {0} not found")]
    FleetNotFound(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during a scheduling pass.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
