//! A thread-safe in-memory storage for the currently active flag table. [`ConfigurationStore`]
//! provides concurrent access for readers (flag evaluation, snapshot capture) and writers (the
//! poller).
use std::sync::{Arc, RwLock};

use futures::{future::BoxFuture, FutureExt};

use crate::{error::FlagEvaluationError, FlagSource, FlagTable, Result};

/// `ConfigurationStore` provides a `Sync` storage for flag definitions that allows concurrent
/// access for readers and writers.
///
/// The flag table itself is always immutable and can only be replaced completely.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<FlagTable>>>,
}

impl ConfigurationStore {
    /// Create a new empty configuration store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Get the currently-active flag table. Returns `None` if nothing has been fetched/stored yet.
    pub fn get_configuration(&self) -> Option<Arc<FlagTable>> {
        // self.configuration.read() should always return Ok(). Err() is possible only if the lock
        // is poisoned (writer panicked while holding the lock), which should never happen.
        let configuration = self
            .configuration
            .read()
            .expect("thread holding configuration lock should not panic");

        configuration.clone()
    }

    /// Set a new flag table, returning the previous one.
    pub fn set_configuration(&self, table: Arc<FlagTable>) -> Option<Arc<FlagTable>> {
        let mut configuration_slot = self
            .configuration
            .write()
            .expect("thread holding configuration lock should not panic");

        log::debug!(target: "feature_lookup", table_id = table.id(); "activating new flag table");
        configuration_slot.replace(table)
    }
}

impl FlagSource for ConfigurationStore {
    fn flag_state<'a>(
        &'a self,
        flag_key: &'a str,
    ) -> BoxFuture<'a, Result<(bool, Arc<FlagTable>)>> {
        let result = self
            .flag_table()
            .and_then(|table| Ok((table.is_enabled(flag_key)?, table)));
        futures::future::ready(result).boxed()
    }

    fn flag_table(&self) -> Result<Arc<FlagTable>> {
        self.get_configuration()
            .ok_or_else(|| FlagEvaluationError::ConfigurationMissing.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ConfigurationStore;
    use crate::{error::FlagEvaluationError, Error, Feature, FlagSource, FlagTable};

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new());

        assert!(store.get_configuration().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_configuration(Arc::new(FlagTable::new([])));
            })
            .join();
        }

        assert!(store.get_configuration().is_some());
    }

    #[test]
    fn missing_configuration_is_an_error() {
        let store = ConfigurationStore::new();

        assert!(matches!(
            store.flag_table(),
            Err(Error::Evaluation(FlagEvaluationError::ConfigurationMissing))
        ));
        assert!(futures::executor::block_on(store.flag_state("flag")).is_err());
    }

    #[test]
    fn replacing_configuration_leaves_old_table_intact() {
        let store = ConfigurationStore::new();
        store.set_configuration(Arc::new(FlagTable::new([Feature {
            key: "flag".into(),
            enabled: true,
            enabled_for: vec![],
        }])));
        let before = store.flag_table().unwrap();

        let previous = store.set_configuration(Arc::new(FlagTable::new([Feature {
            key: "flag".into(),
            enabled: false,
            enabled_for: vec![],
        }])));

        assert!(Arc::ptr_eq(&previous.unwrap(), &before));
        assert!(before.is_enabled("flag").unwrap());
        let (enabled, table) = futures::executor::block_on(store.flag_state("flag")).unwrap();
        assert!(!enabled);
        assert!(!Arc::ptr_eq(&table, &before));
    }
}
