//! The boundary to whatever serves flag definitions.
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{FlagTable, Result};

/// A flag store: the source of truth for flag definitions.
///
/// Implementations are refreshed out-of-band (e.g., by a poller). Lookups only ever read from
/// them.
pub trait FlagSource: Send + Sync {
    /// Global switch of `flag_key` together with the table it was read from. Unknown flags are
    /// disabled.
    ///
    /// Both come from a single read of the store, so the filters in the returned table belong to
    /// the same version as the switch. This may involve a round-trip to the store and is
    /// therefore asynchronous.
    fn flag_state<'a>(&'a self, flag_key: &'a str)
        -> BoxFuture<'a, Result<(bool, Arc<FlagTable>)>>;

    /// Currently active flag table.
    ///
    /// The returned table is immutable; later refreshes replace it rather than modify it, which is
    /// what lets a snapshot hold on to it.
    fn flag_table(&self) -> Result<Arc<FlagTable>>;
}

impl<T: FlagSource + ?Sized> FlagSource for Arc<T> {
    fn flag_state<'a>(
        &'a self,
        flag_key: &'a str,
    ) -> BoxFuture<'a, Result<(bool, Arc<FlagTable>)>> {
        (**self).flag_state(flag_key)
    }

    fn flag_table(&self) -> Result<Arc<FlagTable>> {
        (**self).flag_table()
    }
}
