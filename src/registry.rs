//! Process-wide table of request-scoped snapshots.
use std::sync::{Arc, OnceLock};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{EvaluationSnapshot, Error, ResolvedSnapshot, Result};

/// Concurrent map from snapshot key to [`EvaluationSnapshot`].
///
/// Operations on distinct keys only ever wait for the brief shard lock of a map insert or
/// removal. Snapshots are captured before that lock is taken.
#[derive(Default)]
pub struct SnapshotRegistry {
    snapshots: DashMap<String, Arc<EvaluationSnapshot>>,
}

impl SnapshotRegistry {
    pub fn new() -> SnapshotRegistry {
        SnapshotRegistry::default()
    }

    /// Registry shared by everything in the process that does not bring its own.
    pub fn global() -> Arc<SnapshotRegistry> {
        static GLOBAL: OnceLock<Arc<SnapshotRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(SnapshotRegistry::new())).clone()
    }

    /// Install the snapshot produced by `factory` under `key`. An empty key is ignored.
    ///
    /// On failure (key already taken or `factory` error) nothing new is left under `key`,
    /// `on_register_failure` receives [`Error::RegistrationFailed`], and the same error is
    /// returned.
    pub fn register<F, H>(&self, key: &str, factory: F, on_register_failure: H) -> Result<()>
    where
        F: FnOnce(&str) -> Result<EvaluationSnapshot>,
        H: FnOnce(&Error),
    {
        if key.is_empty() {
            return Ok(());
        }

        let result = self.install(key, factory);
        if let Err(err) = &result {
            log::warn!(target: "feature_lookup", key; "snapshot registration failed: {err}");
            on_register_failure(err);
        }
        result
    }

    fn install<F>(&self, key: &str, factory: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<EvaluationSnapshot>,
    {
        let failed = |reason: String| Error::RegistrationFailed {
            key: key.to_owned(),
            reason,
        };

        if self.snapshots.contains_key(key) {
            return Err(failed("key is already registered".to_owned()));
        }
        let snapshot = Arc::new(factory(key).map_err(|err| failed(err.to_string()))?);

        match self.snapshots.entry(key.to_owned()) {
            Entry::Occupied(_) => Err(failed("key is already registered".to_owned())),
            Entry::Vacant(vacant) => {
                vacant.insert(snapshot);
                log::debug!(target: "feature_lookup", key; "registered snapshot");
                Ok(())
            }
        }
    }

    /// Remove the snapshot under `key`, returning it. Unknown keys are ignored.
    pub fn unregister(&self, key: &str) -> Option<Arc<EvaluationSnapshot>> {
        let (_, snapshot) = self.snapshots.remove(key)?;
        log::debug!(target: "feature_lookup", key; "unregistered snapshot");
        Some(snapshot)
    }

    /// Snapshot registered under `key`, or [`ResolvedSnapshot::Default`].
    pub fn resolve(&self, key: Option<&str>) -> ResolvedSnapshot {
        key.and_then(|key| self.snapshots.get(key))
            .map_or(ResolvedSnapshot::Default, |snapshot| {
                ResolvedSnapshot::Snapshot(snapshot.value().clone())
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.snapshots.contains_key(key)
    }

    /// Number of registered snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
