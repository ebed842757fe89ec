//! Public lookup surface.
use std::{future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};

use crate::{
    ConfigurationStore, Error, EvaluationContext, EvaluationEngine, FlagQuery, FlagSource,
    LookupConfig, PollerThread, PollerThreadConfig, Result, SnapshotCoordinator, SnapshotRegistry,
};

/// Answers flag queries.
pub trait FeatureLookup: Send + Sync {
    /// Blocking lookup. Never fails: any error resolves to the query's default value.
    fn lookup(&self, query: &FlagQuery) -> bool;

    /// Non-blocking lookup.
    ///
    /// Failures resolve to the query's default value if it asks to suppress them, and surface as
    /// [`Error::LookupFailed`] otherwise.
    fn lookup_async<'a>(&'a self, query: &'a FlagQuery) -> BoxFuture<'a, Result<bool>>;
}

/// Lookup used when feature management is switched off. Every flag is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLookup;

impl FeatureLookup for DisabledLookup {
    fn lookup(&self, _query: &FlagQuery) -> bool {
        false
    }

    fn lookup_async<'a>(&'a self, _query: &'a FlagQuery) -> BoxFuture<'a, Result<bool>> {
        futures::future::ready(Ok(false)).boxed()
    }
}

struct Job {
    payload: String,
    respond: oneshot::Sender<Result<bool>>,
}

/// [`FeatureLookup`] backed by a flag store and per-request snapshots.
///
/// Evaluation runs on a dedicated worker thread that handles one query at a time, so callers never
/// block request threads on the flag store and the evaluation cache needs no locking. Queries
/// cross over to the worker in their encoded form.
pub struct LookupService {
    sender: mpsc::UnboundedSender<Job>,
    join_handle: std::thread::JoinHandle<()>,
    coordinator: SnapshotCoordinator,
    poller: Option<PollerThread>,
}

impl LookupService {
    /// Start a service over `source`, sharing the process-wide [`SnapshotRegistry`].
    pub fn start(config: &LookupConfig, source: Arc<dyn FlagSource>) -> Result<LookupService> {
        LookupService::start_with_registry(config, source, SnapshotRegistry::global())
    }

    /// Start a service over `source` using its own `registry`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if the cache bounds are out of range.
    /// - [`Error::Io`] if the worker thread failed to start.
    pub fn start_with_registry(
        config: &LookupConfig,
        source: Arc<dyn FlagSource>,
        registry: Arc<SnapshotRegistry>,
    ) -> Result<LookupService> {
        config.cache.validate()?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let mut engine = EvaluationEngine::new(registry.clone(), source.clone(), config);

        let join_handle = std::thread::Builder::new()
            .name("feature-lookup".to_owned())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(err) => {
                            log::error!(target: "feature_lookup", "failed to start lookup runtime: {err}");
                            return;
                        }
                    };

                    runtime.block_on(async {
                        while let Some(job) = receiver.recv().await {
                            let result = match EvaluationContext::decode(&job.payload) {
                                Ok(context) => engine.evaluate(&context).await,
                                Err(err) => Err(err),
                            };
                            // The caller may have given up waiting.
                            let _ = job.respond.send(result);
                        }
                    });
                    log::debug!(target: "feature_lookup", "lookup worker stopped");
                }));

                if result.is_err() {
                    log::error!(target: "feature_lookup", "lookup worker panicked");
                }
            })?;

        let coordinator = SnapshotCoordinator::new(
            registry,
            source,
            config.feature_management.snapshot_enabled,
        );

        Ok(LookupService {
            sender,
            join_handle,
            coordinator,
            poller: None,
        })
    }

    /// Start a service over a remote flag store polled in the background.
    pub fn start_remote(config: &LookupConfig) -> Result<LookupService> {
        let management = &config.feature_management;
        let store = Arc::new(ConfigurationStore::new());
        let poller = PollerThread::start(
            management.base_url.clone(),
            management.api_key.clone(),
            store.clone(),
            PollerThreadConfig::new().with_interval(management.poll_interval),
        )?;

        let mut service = LookupService::start(config, store)?;
        service.poller = Some(poller);
        Ok(service)
    }

    /// Coordinator for request scopes whose snapshots this service evaluates against.
    pub fn coordinator(&self) -> &SnapshotCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        self.coordinator.registry()
    }

    /// Block until the flag store has delivered its first table. Returns immediately when there
    /// is no poller.
    pub fn wait_for_configuration(&self) -> Result<()> {
        match &self.poller {
            Some(poller) => poller.wait_for_configuration(),
            None => Ok(()),
        }
    }

    /// Stop the worker (and the poller, if any) and wait for them to exit.
    ///
    /// Queries already submitted are answered first.
    pub fn shutdown(self) -> Result<()> {
        let LookupService {
            sender,
            join_handle,
            poller,
            ..
        } = self;

        drop(sender);
        join_handle.join().map_err(|_| Error::LookupWorkerStopped)?;

        if let Some(poller) = poller {
            poller.shutdown()?;
        }
        Ok(())
    }

    async fn submit(&self, query: &FlagQuery) -> Result<bool> {
        let (respond, response) = oneshot::channel();
        self.sender
            .send(Job {
                payload: query.encode(),
                respond,
            })
            .map_err(|_| Error::LookupWorkerStopped)?;

        response.await.map_err(|_| Error::LookupWorkerStopped)?
    }
}

impl FeatureLookup for LookupService {
    fn lookup(&self, query: &FlagQuery) -> bool {
        // Unlike `lookup_async`, this never fails, whatever `suppress_failure` says.
        match futures::executor::block_on(self.lookup_async(query)) {
            Ok(value) => value,
            Err(err) => {
                log::warn!(target: "feature_lookup", flag_key = query.name(); "blocking lookup failed, using default value: {err}");
                query.default_value()
            }
        }
    }

    fn lookup_async<'a>(&'a self, query: &'a FlagQuery) -> BoxFuture<'a, Result<bool>> {
        async move {
            match self.submit(query).await {
                Ok(value) => Ok(value),
                Err(err) if query.suppress_failure() => {
                    log::warn!(target: "feature_lookup", flag_key = query.name(); "lookup failed, using default value: {err}");
                    Ok(query.default_value())
                }
                Err(err) => Err(err.into_lookup_failure()),
            }
        }
        .boxed()
    }
}

impl<T: FeatureLookup + ?Sized> FeatureLookup for Arc<T> {
    fn lookup(&self, query: &FlagQuery) -> bool {
        (**self).lookup(query)
    }

    fn lookup_async<'a>(&'a self, query: &'a FlagQuery) -> BoxFuture<'a, Result<bool>> {
        (**self).lookup_async(query)
    }
}

impl<T: FeatureLookup + ?Sized> FeatureLookup for Box<T> {
    fn lookup(&self, query: &FlagQuery) -> bool {
        (**self).lookup(query)
    }

    fn lookup_async<'a>(&'a self, query: &'a FlagQuery) -> BoxFuture<'a, Result<bool>> {
        (**self).lookup_async(query)
    }
}

/// Run `new` if the flag is on, `old` otherwise.
///
/// Only the chosen branch is polled.
pub async fn select<L, T, Old, New>(
    lookup: &L,
    query: &FlagQuery,
    old: Old,
    new: New,
) -> Result<T>
where
    L: FeatureLookup + ?Sized,
    Old: Future<Output = T>,
    New: Future<Output = T>,
{
    if lookup.lookup_async(query).await? {
        Ok(new.await)
    } else {
        Ok(old.await)
    }
}

/// Blocking counterpart of [`select`].
pub fn select_blocking<L, T>(
    lookup: &L,
    query: &FlagQuery,
    old: impl FnOnce() -> T,
    new: impl FnOnce() -> T,
) -> T
where
    L: FeatureLookup + ?Sized,
{
    if lookup.lookup(query) {
        new()
    } else {
        old()
    }
}
