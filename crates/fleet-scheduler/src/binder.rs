//! Store seams used by the decision loop: reading pending instances and
//! durably binding them.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::debug;

use fleet_core::Instance;
use fleet_state::{StateError, StateResult, StateStore};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// The stored object changed since the scheduler read it.
    #[error("bind conflict on {uid}: {reason}")]
    Conflict { uid: String, reason: String },

    #[error("instance {0} no longer exists")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StateError> for BindError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict { key, reason } => BindError::Conflict { uid: key, reason },
            StateError::NotFound(uid) => BindError::NotFound(uid),
            other => BindError::Store(other.to_string()),
        }
    }
}

/// Durable write committing a placement.
pub trait Binder: Send + Sync {
    /// Set the instance's fleet in the store, guarded by the instance's
    /// resource version.
    fn bind<'a>(
        &'a self,
        instance: &'a Instance,
        fleet: &'a str,
    ) -> BoxFuture<'a, Result<(), BindError>>;
}

/// Current store view of an instance, by uid.
pub trait InstanceLister: Send + Sync {
    fn get_instance(&self, uid: &str) -> StateResult<Option<Instance>>;
}

impl InstanceLister for StateStore {
    fn get_instance(&self, uid: &str) -> StateResult<Option<Instance>> {
        StateStore::get_instance(self, uid)
    }
}

/// Binds through [`StateStore::bind_instance`] on the blocking pool.
#[derive(Clone)]
pub struct StoreBinder {
    store: StateStore,
}

impl StoreBinder {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl Binder for StoreBinder {
    fn bind<'a>(
        &'a self,
        instance: &'a Instance,
        fleet: &'a str,
    ) -> BoxFuture<'a, Result<(), BindError>> {
        Box::pin(async move {
            let store = self.store.clone();
            let uid = instance.meta.uid.clone();
            let expected = instance.meta.resource_version;
            let fleet = fleet.to_string();

            let bound = tokio::task::spawn_blocking(move || {
                store.bind_instance(&uid, expected, &fleet)
            })
            .await
            .map_err(|e| BindError::Store(format!("bind task failed: {e}")))??;

            debug!(
                instance = %bound.meta.uid,
                fleet = %bound.spec.fleet_name,
                version = bound.meta.resource_version,
                "binding written"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_instance() -> (StateStore, Instance) {
        let store = StateStore::open_in_memory().unwrap();
        let inst = store
            .create_instance(&Instance::new("web-0", "small"))
            .unwrap();
        (store, inst)
    }

    #[tokio::test]
    async fn store_binder_writes_fleet() {
        let (store, inst) = store_with_instance();
        let binder = StoreBinder::new(store.clone());

        binder.bind(&inst, "fleet-a").await.unwrap();

        let stored = store.get_instance(inst.uid()).unwrap().unwrap();
        assert_eq!(stored.spec.fleet_name, "fleet-a");
        assert_eq!(stored.meta.resource_version, inst.meta.resource_version + 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let (store, inst) = store_with_instance();
        store.mark_instance_deleting(inst.uid()).unwrap();
        let binder = StoreBinder::new(store);

        let err = binder.bind(&inst, "fleet-a").await.unwrap_err();
        assert!(matches!(err, BindError::Conflict { .. }));
    }

    #[tokio::test]
    async fn missing_instance_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let binder = StoreBinder::new(store);
        let ghost = Instance::new("ghost", "small").with_uid("nope");

        assert_eq!(
            binder.bind(&ghost, "fleet-a").await,
            Err(BindError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn lister_reads_through_store() {
        let (store, inst) = store_with_instance();
        let lister: &dyn InstanceLister = &store;
        assert!(lister.get_instance(inst.uid()).unwrap().is_some());
        assert!(lister.get_instance("missing").unwrap().is_none());
    }
}
