//! Per-request snapshot lifecycle.
//!
//! A [`RequestScope`] registers a snapshot when its request starts and unregisters it exactly once
//! when the request ends, whichever way it ends. The snapshot key is published into the request's
//! [`RequestContext`] so that lookups issued while handling the request find it.
//!
//! ```text
//! NotStarted -> Registered -> {Completed, Failed, Cancelled} -> Unregistered
//!          \--> Defaulted (registration failed) ---------------/
//! ```
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    future::Future,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{EvaluationSnapshot, FlagSource, SnapshotRegistry};

/// Name under which the snapshot key is stored in the [`RequestContext`].
pub const LOOKUP_KEY_ENTRY: &str = "feature_lookup.key";

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Mutable key-value bag that travels with a request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext(Arc<Mutex<HashMap<String, String>>>);

impl RequestContext {
    pub fn new() -> RequestContext {
        RequestContext::default()
    }

    /// Context of the enclosing [`scope`](RequestContext::scope), if any.
    pub fn current() -> Option<RequestContext> {
        REQUEST_CONTEXT.try_with(RequestContext::clone).ok()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.0.lock().get(name).cloned()
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.lock().insert(name.into(), value.into())
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.0.lock().remove(name)
    }

    /// Snapshot key published by the request's [`RequestScope`].
    pub fn lookup_key(&self) -> Option<String> {
        self.get(LOOKUP_KEY_ENTRY)
    }

    /// Run `future` with `self` as the current context.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        REQUEST_CONTEXT.scope(self, future).await
    }

    /// Run `f` with `self` as the current context.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        REQUEST_CONTEXT.sync_scope(self, f)
    }
}

/// Snapshot key visible to the current task or thread, if any.
pub fn current_lookup_key() -> Option<String> {
    RequestContext::current().and_then(|context| context.lookup_key())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    /// A snapshot is registered under the scope's key.
    Registered,
    /// Registration failed or snapshots are disabled. Lookups use the default snapshot.
    Defaulted,
    Completed,
    Failed,
    Cancelled,
    /// Terminal. The snapshot (if any) has been unregistered.
    Unregistered,
}

/// Creates [`RequestScope`]s bound to one registry and flag source.
#[derive(Clone)]
pub struct SnapshotCoordinator {
    registry: Arc<SnapshotRegistry>,
    source: Arc<dyn FlagSource>,
    snapshot_enabled: bool,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl SnapshotCoordinator {
    pub fn new(
        registry: Arc<SnapshotRegistry>,
        source: Arc<dyn FlagSource>,
        snapshot_enabled: bool,
    ) -> SnapshotCoordinator {
        SnapshotCoordinator {
            registry,
            source,
            snapshot_enabled,
        }
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    /// New scope with a fresh context and a key derived from the scope's own sequence number.
    pub fn scope(&self) -> RequestScope {
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.new_scope(RequestContext::new(), hash_identity(&sequence), sequence)
    }

    /// New scope with a fresh context and a key derived from `identity`.
    pub fn scope_for(&self, identity: &impl Hash) -> RequestScope {
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.new_scope(RequestContext::new(), hash_identity(identity), sequence)
    }

    /// New scope that publishes its key into an existing context bag.
    pub fn attach(&self, context: RequestContext, identity: &impl Hash) -> RequestScope {
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.new_scope(context, hash_identity(identity), sequence)
    }

    fn new_scope(&self, context: RequestContext, identity: u64, sequence: u64) -> RequestScope {
        RequestScope {
            registry: self.registry.clone(),
            source: self.source.clone(),
            snapshot_enabled: self.snapshot_enabled,
            key: format!("feature.manager.{identity:016x}.{sequence}"),
            context,
            state: LifecycleState::NotStarted,
            outcome: None,
        }
    }

    /// Run `body` as one request: register on entry, unregister when it resolves or is dropped.
    ///
    /// Lookups built inside `body` pick up the snapshot key automatically.
    pub async fn run<F, T, E>(&self, body: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let scope = self.scope();
        drive(scope, body).await
    }

    /// Same as [`run`](SnapshotCoordinator::run) with the key derived from `identity`.
    pub async fn run_for<F, T, E>(&self, identity: &impl Hash, body: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let scope = self.scope_for(identity);
        drive(scope, body).await
    }
}

async fn drive<F, T, E>(mut scope: RequestScope, body: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    scope.start();
    // If this future is dropped here, dropping `scope` cancels it.
    let result = scope.context().clone().scope(body).await;
    match result {
        Ok(_) => scope.complete(),
        Err(_) => scope.fail(),
    }
    result
}

fn hash_identity(identity: &impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    hasher.finish()
}

/// Lifecycle of a single request's snapshot.
///
/// Dropping a scope that is still registered counts as cancellation.
pub struct RequestScope {
    registry: Arc<SnapshotRegistry>,
    source: Arc<dyn FlagSource>,
    snapshot_enabled: bool,
    key: String,
    context: RequestContext,
    state: LifecycleState,
    outcome: Option<LifecycleState>,
}

impl RequestScope {
    /// Register the snapshot. Has no effect unless the scope has not started yet.
    pub fn start(&mut self) -> LifecycleState {
        if self.state != LifecycleState::NotStarted {
            return self.state;
        }

        if !self.snapshot_enabled {
            self.use_default();
            return self.state;
        }

        let source = self.source.clone();
        let registered = self.registry.register(
            &self.key,
            |key| EvaluationSnapshot::capture(key, source.as_ref()),
            |_| {},
        );

        match registered {
            Ok(()) => {
                self.context.insert(LOOKUP_KEY_ENTRY, self.key.clone());
                self.state = LifecycleState::Registered;
            }
            Err(_) => self.use_default(),
        }
        self.state
    }

    fn use_default(&mut self) {
        self.context.remove(LOOKUP_KEY_ENTRY);
        self.state = LifecycleState::Defaulted;
    }

    pub fn complete(&mut self) {
        self.finish(LifecycleState::Completed);
    }

    pub fn fail(&mut self) {
        self.finish(LifecycleState::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(LifecycleState::Cancelled);
    }

    /// Only the first terminal signal has an effect.
    fn finish(&mut self, outcome: LifecycleState) {
        match self.state {
            LifecycleState::Unregistered => return,
            LifecycleState::Registered => {
                self.state = outcome;
                if self.registry.unregister(&self.key).is_none() {
                    log::debug!(target: "feature_lookup", key = self.key.as_str(); "snapshot was removed before its request finished");
                }
                self.context.remove(LOOKUP_KEY_ENTRY);
            }
            _ => {}
        }

        log::trace!(target: "feature_lookup", key = self.key.as_str(); "request scope finished");
        self.outcome = Some(outcome);
        self.state = LifecycleState::Unregistered;
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The terminal signal that ended this scope.
    pub fn outcome(&self) -> Option<LifecycleState> {
        self.outcome
    }

    /// Key this scope registers its snapshot under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Snapshot key lookups should use, if a snapshot is currently registered.
    pub fn lookup_key(&self) -> Option<String> {
        self.context.lookup_key()
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Run `f` with this scope's context as the current one.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        self.context.clone().sync_scope(f)
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if self.state == LifecycleState::Registered {
            self.cancel();
        }
    }
}
