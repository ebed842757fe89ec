//! Request-scoped feature flag lookup.
//!
//! # Overview
//!
//! Flags are boolean toggles with optional targeting filters, served by a flag store
//! ([`FlagSource`]). The store is refreshed out of band, so flag state may change at any moment.
//! This crate makes sure that a single request sees *one* consistent view of it:
//!
//! - When a request starts, a [`RequestScope`] captures the current flag table into an
//!   [`EvaluationSnapshot`] and registers it in the [`SnapshotRegistry`] under a unique key. The key
//!   is published into the request's [`RequestContext`].
//! - Every [`FlagQuery`] built while handling the request carries that key, and
//!   [`LookupService`] evaluates it against the snapshot.
//! - When the request completes, fails or is cancelled, the snapshot is unregistered exactly once.
//!
//! Lookups without a key (or whose snapshot could not be registered) evaluate against the shared
//! flag store, the *default snapshot*.
//!
//! Evaluation runs on a dedicated worker thread. Outcomes evaluated against a snapshot are kept in
//! a [`ReclaimingCache`], which holds them only as long as their snapshot is alive.
//!
//! ```no_run
//! # async fn handle() -> feature_lookup::Result<()> {
//! use feature_lookup::{FeatureLookup, FlagQuery, LookupConfig, LookupService};
//!
//! let config = LookupConfig::from_env()?;
//! let service = LookupService::start_remote(&config)?;
//! service.wait_for_configuration()?;
//!
//! service
//!     .coordinator()
//!     .run(async {
//!         let query = FlagQuery::builder("new-checkout")
//!             .subject_id("alice")
//!             .suppress_failure(true)
//!             .build()?;
//!         let enabled = service.lookup_async(&query).await?;
//!         println!("new-checkout: {enabled}");
//!         Ok::<_, feature_lookup::Error>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Snapshot housekeeping never fails a request: a snapshot that cannot be registered makes the
//! request fall back to the default snapshot.
//! Evaluation failures surface as [`Error::LookupFailed`] unless the query asks to suppress them.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `feature_lookup`
//! target. Consider integrating a `log`-compatible logger implementation for better visibility
//! into snapshot lifecycle and evaluation.
//!
//! # Examples
//!
//! A runnable example lives in `demos/simple`.

#![warn(rustdoc::missing_crate_level_docs)]

mod cache;
mod config;
mod configuration_store;
mod error;
mod eval;
mod features;
mod fetcher;
mod lifecycle;
mod local;
mod lookup;
mod poller;
mod query;
mod registry;
mod snapshot;
mod source;
mod targeting;

pub use cache::{Reclaimable, ReclaimingCache};
pub use config::{CacheConfig, FeatureManagementConfig, LookupConfig, StoreKind};
pub use configuration_store::ConfigurationStore;
pub use error::{Error, FlagEvaluationError, Result};
pub use eval::EvaluationEngine;
pub use features::{Audience, Feature, FeatureFilter, FilterParameters, FlagTable};
pub use lifecycle::{
    current_lookup_key, LifecycleState, RequestContext, RequestScope, SnapshotCoordinator,
    LOOKUP_KEY_ENTRY,
};
pub use local::LocalFeatureLookup;
pub use lookup::{select, select_blocking, DisabledLookup, FeatureLookup, LookupService};
pub use poller::{PollerThread, PollerThreadConfig};
pub use query::{EvaluationContext, FlagQuery, FlagQueryBuilder};
pub use registry::SnapshotRegistry;
pub use snapshot::{EvaluationSnapshot, ResolvedSnapshot};
pub use source::FlagSource;
pub use targeting::TargetingSubject;
