//! fleet-core — shared object types and daemon configuration.
//!
//! Everything here is plain data: the scheduler, the store, and the
//! daemon all agree on these shapes.

pub mod config;
pub mod error;
pub mod types;

pub use config::{FleetdConfig, SchedulerSettings};
pub use error::{CoreError, CoreResult};
pub use types::*;
