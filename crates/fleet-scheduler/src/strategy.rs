//! Key derivation for the scheduler cache.
//!
//! The cache never reads identity fields directly; it asks a
//! [`CacheStrategy`] for the instance key and for the key of the fleet the
//! instance is bound to. The strategy is handed to [`Cache::new`] so tests
//! and embedders can swap it without touching the cache.
//!
//! [`Cache::new`]: crate::cache::Cache::new

use fleet_core::Instance;

use crate::error::{CacheError, CacheResult};

pub trait CacheStrategy: Send + Sync {
    /// Stable identity of the instance. Fails when the instance has none.
    fn key(&self, instance: &Instance) -> CacheResult<String>;

    /// Key of the fleet the instance is bound to; empty when unbound.
    fn fleet_key(&self, instance: &Instance) -> String;
}

/// Keys instances by their store-assigned UID and fleets by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl CacheStrategy for DefaultStrategy {
    fn key(&self, instance: &Instance) -> CacheResult<String> {
        if instance.meta.uid.is_empty() {
            return Err(CacheError::MissingUid {
                name: instance.meta.name.clone(),
            });
        }
        Ok(instance.meta.uid.clone())
    }

    fn fleet_key(&self, instance: &Instance) -> String {
        instance.spec.fleet_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_uses_uid() {
        let inst = Instance::new("web", "small").with_uid("uid-1");
        assert_eq!(DefaultStrategy.key(&inst).unwrap(), "uid-1");
    }

    #[test]
    fn missing_uid_is_an_error() {
        let inst = Instance::new("web", "small");
        assert_eq!(
            DefaultStrategy.key(&inst),
            Err(CacheError::MissingUid {
                name: "web".to_string()
            })
        );
    }

    #[test]
    fn fleet_key_is_empty_when_unbound() {
        let inst = Instance::new("web", "small").with_uid("uid-1");
        assert_eq!(DefaultStrategy.fleet_key(&inst), "");
        assert_eq!(DefaultStrategy.fleet_key(&inst.with_fleet("fleet-a")), "fleet-a");
    }
}
