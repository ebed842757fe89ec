use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{eval::CachedOutcome, FlagSource, FlagTable, Result};

/// Flag state frozen for the lifetime of one request.
///
/// The snapshot holds on to the flag table that was active when it was captured. Refreshes of the
/// flag store install a new table and never touch this one.
///
/// Outcomes the engine caches for this snapshot are owned here, so they are reclaimed together
/// with the snapshot once it is unregistered.
#[derive(Debug)]
pub struct EvaluationSnapshot {
    key: String,
    table: Arc<FlagTable>,
    created_at: DateTime<Utc>,
    outcomes: Mutex<Vec<Arc<CachedOutcome>>>,
}

impl EvaluationSnapshot {
    /// Freeze the flag table currently served by `source` under `key`.
    pub fn capture(key: impl Into<String>, source: &dyn FlagSource) -> Result<EvaluationSnapshot> {
        let table = source.flag_table()?;
        Ok(EvaluationSnapshot::new(key, table))
    }

    pub fn new(key: impl Into<String>, table: Arc<FlagTable>) -> EvaluationSnapshot {
        EvaluationSnapshot {
            key: key.into(),
            table,
            created_at: Utc::now(),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn table(&self) -> &Arc<FlagTable> {
        &self.table
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Global enablement of `flag_key` as of capture time.
    pub fn is_enabled(&self, flag_key: &str) -> Result<bool> {
        self.table.is_enabled(flag_key)
    }

    pub(crate) fn retain(&self, outcome: Arc<CachedOutcome>) {
        self.outcomes.lock().push(outcome);
    }
}

/// Outcome of resolving a lookup key against the registry.
#[derive(Debug, Clone)]
pub enum ResolvedSnapshot {
    /// A request-scoped snapshot registered under the requested key.
    Snapshot(Arc<EvaluationSnapshot>),
    /// No snapshot under the key (or no key at all). Evaluate against the shared flag store.
    Default,
}

impl ResolvedSnapshot {
    pub fn is_default(&self) -> bool {
        matches!(self, ResolvedSnapshot::Default)
    }
}
