//! redb table definitions for the fleetgrid object store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized objects).

use redb::TableDefinition;

/// Fleets keyed by `{fleet_name}`.
pub const FLEETS: TableDefinition<&str, &[u8]> = TableDefinition::new("fleets");

/// Instances keyed by `{instance_uid}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
