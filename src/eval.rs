use std::{collections::BTreeSet, sync::Arc};

use crate::{
    cache::{Reclaimable, ReclaimingCache},
    config::LookupConfig,
    EvaluationContext, EvaluationSnapshot, FlagSource, FlagTable, ResolvedSnapshot, Result,
    SnapshotRegistry,
};

/// Identifies an evaluation: snapshot key, flag name, subject id and groups.
pub(crate) type OutcomeKey = (String, String, Option<String>, BTreeSet<String>);

/// A cached evaluation result, owned by the snapshot it was computed against.
pub(crate) type CachedOutcome = Reclaimable<OutcomeKey, bool>;

/// Evaluates decoded queries against the request's snapshot or the shared flag store.
///
/// The engine is not `Sync`: it owns a [`ReclaimingCache`] and is meant to be driven by a single
/// serialized worker.
pub struct EvaluationEngine {
    registry: Arc<SnapshotRegistry>,
    source: Arc<dyn FlagSource>,
    /// Results of snapshot evaluations. Entries die with their snapshot.
    outcomes: Option<ReclaimingCache<OutcomeKey, bool>>,
    snapshot_enabled: bool,
}

impl EvaluationEngine {
    pub fn new(
        registry: Arc<SnapshotRegistry>,
        source: Arc<dyn FlagSource>,
        config: &LookupConfig,
    ) -> EvaluationEngine {
        EvaluationEngine {
            registry,
            source,
            outcomes: config
                .cache
                .enabled
                .then(|| ReclaimingCache::new(&config.cache)),
            snapshot_enabled: config.feature_management.snapshot_enabled,
        }
    }

    /// Evaluate a flag for the subject described by `context`.
    ///
    /// The flag is on if it is globally enabled and either declares no filters or at least one of
    /// its filters matches the subject. Unknown flags are off.
    pub async fn evaluate(&mut self, context: &EvaluationContext) -> Result<bool> {
        let flag_key = context.name();

        let resolved = if self.snapshot_enabled {
            self.registry.resolve(context.lookup_key())
        } else {
            ResolvedSnapshot::Default
        };

        let result = match resolved {
            ResolvedSnapshot::Snapshot(snapshot) => {
                log::trace!(target: "feature_lookup", flag_key, key = snapshot.key(); "evaluating against snapshot");
                self.evaluate_snapshot(&snapshot, context)?
            }
            ResolvedSnapshot::Default => {
                log::trace!(target: "feature_lookup", flag_key; "evaluating against default snapshot");
                let (enabled, table) = self.source.flag_state(flag_key).await?;
                enabled && matches(&table, context)?
            }
        };

        log::trace!(target: "feature_lookup", flag_key, result; "evaluated flag");
        Ok(result)
    }

    /// Snapshots are immutable, so repeated identical queries against one are served from the
    /// cache.
    fn evaluate_snapshot(
        &mut self,
        snapshot: &EvaluationSnapshot,
        context: &EvaluationContext,
    ) -> Result<bool> {
        let table = snapshot.table();
        let Some(cache) = self.outcomes.as_mut() else {
            return Ok(table.is_enabled(context.name())? && matches(table, context)?);
        };

        let key: OutcomeKey = (
            snapshot.key().to_owned(),
            context.name().to_owned(),
            context.subject_id().map(str::to_owned),
            context.groups().clone(),
        );
        if let Some(outcome) = cache.get(&key) {
            log::trace!(target: "feature_lookup", flag_key = context.name(); "cached outcome");
            return Ok(**outcome);
        }

        let result = table.is_enabled(context.name())? && matches(table, context)?;
        let outcome = cache.reclaimable(key.clone(), result);
        cache.put(key, outcome.clone());
        snapshot.retain(outcome);
        Ok(result)
    }

    /// Number of outcomes currently cached, including ones not purged yet.
    pub fn cached_outcomes(&self) -> usize {
        self.outcomes.as_ref().map_or(0, ReclaimingCache::size)
    }
}

/// Filters of the flag in `table` against the subject. Unknown flags never match.
fn matches(table: &FlagTable, context: &EvaluationContext) -> Result<bool> {
    Ok(table
        .feature(context.name())?
        .is_some_and(|feature| feature.is_enabled_for(&context.subject())))
}
