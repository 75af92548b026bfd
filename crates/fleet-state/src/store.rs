//! StateStore — redb-backed object persistence for fleetgrid.
//!
//! Provides typed CRUD operations over fleets and instances, plus the
//! one conditional write the scheduler needs: binding an instance to a
//! fleet only if nobody else wrote the instance since it was read.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use fleet_core::{Fleet, Instance};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    uid_seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            uid_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(FLEETS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Fleets ─────────────────────────────────────────────────────

    /// Insert or update a fleet. Returns the stored copy with its new
    /// resource version.
    pub fn put_fleet(&self, fleet: &Fleet) -> StateResult<Fleet> {
        if fleet.meta.name.is_empty() {
            return Err(StateError::Write("fleet name must not be empty".to_string()));
        }
        let mut stored = fleet.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FLEETS).map_err(map_err!(Table))?;
            let previous: Option<Fleet> = read_in(&table, &stored.meta.name)?;
            stored.meta.resource_version =
                previous.map_or(1, |p| p.meta.resource_version + 1);
            write_in(&mut table, &stored.meta.name, &stored)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(fleet = %stored.meta.name, version = stored.meta.resource_version, "fleet stored");
        Ok(stored)
    }

    pub fn get_fleet(&self, name: &str) -> StateResult<Option<Fleet>> {
        self.get_json(FLEETS, name)
    }

    pub fn list_fleets(&self) -> StateResult<Vec<Fleet>> {
        self.list_json(FLEETS)
    }

    /// Delete a fleet by name. Returns true if it existed.
    pub fn delete_fleet(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete_key(FLEETS, name)?;
        debug!(fleet = %name, existed, "fleet deleted");
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Create an instance, assigning a UID when it has none.
    ///
    /// The stored copy starts at resource version 1.
    pub fn create_instance(&self, instance: &Instance) -> StateResult<Instance> {
        let mut stored = instance.clone();
        if stored.meta.uid.is_empty() {
            stored.meta.uid = self.generate_uid(&stored.meta.name);
        }
        stored.meta.resource_version = 1;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing: Option<Instance> = read_in(&table, &stored.meta.uid)?;
            if existing.is_some() {
                return Err(StateError::AlreadyExists(stored.meta.uid));
            }
            write_in(&mut table, &stored.meta.uid, &stored)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(uid = %stored.meta.uid, name = %stored.meta.name, "instance created");
        Ok(stored)
    }

    pub fn get_instance(&self, uid: &str) -> StateResult<Option<Instance>> {
        self.get_json(INSTANCES, uid)
    }

    pub fn list_instances(&self) -> StateResult<Vec<Instance>> {
        self.list_json(INSTANCES)
    }

    /// Delete an instance by UID. Returns true if it existed.
    pub fn delete_instance(&self, uid: &str) -> StateResult<bool> {
        let existed = self.delete_key(INSTANCES, uid)?;
        debug!(%uid, existed, "instance deleted");
        Ok(existed)
    }

    /// Record that deletion of an instance was requested.
    pub fn mark_instance_deleting(&self, uid: &str) -> StateResult<Instance> {
        self.modify_instance(uid, |inst| {
            inst.meta.deletion_timestamp = Some(epoch_secs());
            Ok(())
        })
    }

    /// Bind an instance to a fleet if its stored resource version still
    /// equals `expected_version` and it is not bound yet.
    ///
    /// The version check and the write happen in one write transaction.
    pub fn bind_instance(
        &self,
        uid: &str,
        expected_version: u64,
        fleet_name: &str,
    ) -> StateResult<Instance> {
        let bound = self.modify_instance(uid, |inst| {
            if inst.meta.resource_version != expected_version {
                return Err(StateError::Conflict {
                    key: uid.to_string(),
                    reason: format!(
                        "resource version is {}, expected {expected_version}",
                        inst.meta.resource_version
                    ),
                });
            }
            if inst.is_bound() {
                return Err(StateError::Conflict {
                    key: uid.to_string(),
                    reason: format!("already bound to {}", inst.spec.fleet_name),
                });
            }
            inst.spec.fleet_name = fleet_name.to_string();
            Ok(())
        })?;
        debug!(%uid, fleet = %fleet_name, "instance bound");
        Ok(bound)
    }

    /// Read-modify-write one instance inside a single write transaction,
    /// bumping its resource version.
    fn modify_instance<F>(&self, uid: &str, apply: F) -> StateResult<Instance>
    where
        F: FnOnce(&mut Instance) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut current: Instance =
                read_in(&table, uid)?.ok_or_else(|| StateError::NotFound(uid.to_string()))?;
            apply(&mut current)?;
            current.meta.resource_version += 1;
            write_in(&mut table, uid, &current)?;
            current
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        read_in(&table, key)
    }

    fn list_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let obj: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(obj);
        }
        Ok(results)
    }

    fn delete_key(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn generate_uid(&self, name: &str) -> String {
        let seq = self.uid_seq.fetch_add(1, Ordering::Relaxed);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        name.hash(&mut hasher);
        seq.hash(&mut hasher);
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .hash(&mut hasher);
        format!("inst-{:016x}-{seq}", hasher.finish())
    }
}

fn read_in<T, Tbl>(table: &Tbl, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let obj: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(obj))
        }
        None => Ok(None),
    }
}

fn write_in<T: Serialize>(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    obj: &T,
) -> StateResult<()> {
    let value = serde_json::to_vec(obj).map_err(map_err!(Serialize))?;
    table
        .insert(key, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
