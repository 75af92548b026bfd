//! fleet-state — object store for fleets and instances.
//!
//! Backed by [redb](https://docs.rs/redb). Objects are JSON-serialized
//! into `&[u8]` value columns; every write bumps the object's
//! `resource_version`, which [`StateStore::bind_instance`] uses for
//! optimistic concurrency.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
