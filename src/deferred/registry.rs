//! Continuation registry: the callbacks waiting on a deferred value.
//!
//! Every stage attaches to its upstream by registering a [`Continuation`].
//! A continuation registered while the upstream is pending is appended to the
//! registry and fired, in registration order, by whichever thread performs
//! the terminal write. A continuation registered after completion fires
//! immediately on the registering thread. Either way it fires exactly once.
//!
//! # Dispatch
//!
//! [`Dispatch`] decides *where* a continuation's work runs:
//!
//! - [`Dispatch::Inline`]: on the thread that discovered completion
//! - [`Dispatch::Pooled`]: submitted to a worker pool
//!
//! If a pool refuses the work (shutdown in progress) or discards it later
//! (immediate shutdown), the continuation's rejection path fails the
//! downstream value, so no stage is left pending because of pool lifecycle.

use super::trampoline;
use crate::error::{Error, Result};
use crate::runtime::{default_pool, WorkerPool, WorkerPoolHandle};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The closed set of stage kinds a continuation can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// A producer computing the initial value.
    Supply,
    /// `map` / `try_map`.
    Map,
    /// `consume`.
    Consume,
    /// `run`.
    Run,
    /// `flat_map`.
    FlatMap,
    /// `combine`, `combine_consume`, `run_after_both`.
    Combine,
    /// `all_of` / `join_all`.
    AllOf,
    /// `either`, `either_consume`, `either_run`.
    Either,
    /// `any_of`.
    AnyOf,
    /// `handle`.
    Handle,
    /// `exceptionally`.
    Exceptionally,
    /// `when_complete`.
    WhenComplete,
}

impl StageKind {
    /// Returns true if an upstream failure skips this stage's function.
    ///
    /// Short-circuiting stages fail their downstream with a composition
    /// error without dispatching any work.
    #[must_use]
    pub const fn short_circuits(self) -> bool {
        matches!(
            self,
            Self::Map | Self::Consume | Self::Run | Self::FlatMap | Self::Combine | Self::Either
        )
    }

    /// Returns the stage name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Supply => "supply",
            Self::Map => "map",
            Self::Consume => "consume",
            Self::Run => "run",
            Self::FlatMap => "flat_map",
            Self::Combine => "combine",
            Self::AllOf => "all_of",
            Self::Either => "either",
            Self::AnyOf => "any_of",
            Self::Handle => "handle",
            Self::Exceptionally => "exceptionally",
            Self::WhenComplete => "when_complete",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage's work runs once its upstream completes.
#[derive(Clone, Default)]
pub enum Dispatch {
    /// Run on the thread that completed the upstream, or on the registering
    /// thread if the upstream was already complete.
    #[default]
    Inline,
    /// Submit to the given worker pool.
    Pooled(WorkerPoolHandle),
}

impl Dispatch {
    /// Dispatch to the process-wide default pool.
    #[must_use]
    pub fn default_pool() -> Self {
        Self::Pooled(default_pool())
    }

    /// Returns true for [`Dispatch::Inline`].
    #[must_use]
    pub const fn is_inline(&self) -> bool {
        matches!(self, Self::Inline)
    }

    /// Run `work` according to this dispatch mode.
    ///
    /// `reject` receives the pool's error if the work is refused at
    /// submission, cancelled while queued or discarded by an immediate
    /// shutdown. It is never called for inline work.
    pub(crate) fn execute<W, R>(&self, stage: StageKind, work: W, reject: R)
    where
        W: FnOnce() + Send + 'static,
        R: Fn(Error) + Send + Sync + 'static,
    {
        match self {
            Self::Inline => work(),
            Self::Pooled(pool) => {
                let reject = Arc::new(reject);
                let abandon = Arc::clone(&reject);
                let submitted =
                    pool.submit_with_abandon(Box::new(work), Box::new(move |err| (*abandon)(err)));
                if let Err(err) = submitted {
                    tracing::debug!(
                        stage = %stage,
                        pool = %pool.name(),
                        error = %err,
                        "stage submission rejected"
                    );
                    (*reject)(err);
                }
            }
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("Inline"),
            Self::Pooled(pool) => f.debug_tuple("Pooled").field(&pool.name()).finish(),
        }
    }
}

impl From<WorkerPoolHandle> for Dispatch {
    fn from(pool: WorkerPoolHandle) -> Self {
        Self::Pooled(pool)
    }
}

impl From<&WorkerPoolHandle> for Dispatch {
    fn from(pool: &WorkerPoolHandle) -> Self {
        Self::Pooled(pool.clone())
    }
}

impl From<&WorkerPool> for Dispatch {
    fn from(pool: &WorkerPool) -> Self {
        Self::Pooled(pool.handle())
    }
}

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;
type Reject = Box<dyn Fn(Error) + Send + Sync + 'static>;

/// A callback waiting for a deferred value's terminal outcome.
pub(crate) struct Continuation<T> {
    stage: StageKind,
    dispatch: Dispatch,
    short_circuit: bool,
    callback: Callback<T>,
    reject: Reject,
}

impl<T: Send + 'static> Continuation<T> {
    /// A stage continuation that runs `callback` per `dispatch`.
    ///
    /// `reject` settles the stage's downstream with a failure. It is used for
    /// pool rejection and, for short-circuiting stages, for upstream failure.
    pub(crate) fn stage<F, R>(stage: StageKind, dispatch: Dispatch, callback: F, reject: R) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
        R: Fn(Error) + Send + Sync + 'static,
    {
        Self {
            stage,
            dispatch,
            short_circuit: stage.short_circuits(),
            callback: Box::new(callback),
            reject: Box::new(reject),
        }
    }

    /// An inline continuation that always sees the raw outcome.
    ///
    /// Combinator nodes use these for their bookkeeping.
    pub(crate) fn observer<F>(stage: StageKind, callback: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            stage,
            dispatch: Dispatch::Inline,
            short_circuit: false,
            callback: Box::new(callback),
            reject: Box::new(|_| {}),
        }
    }

    pub(crate) fn kind(&self) -> StageKind {
        self.stage
    }

    /// Fire with the upstream outcome, consuming the continuation.
    pub(crate) fn fire(self, outcome: Result<T>) {
        let Self {
            stage,
            dispatch,
            short_circuit,
            callback,
            reject,
        } = self;

        match outcome {
            Err(err) if short_circuit => {
                tracing::trace!(stage = %stage, error = %err, "stage short-circuited");
                reject(Error::composition(err));
            }
            outcome => dispatch.execute(stage, move || callback(outcome), reject),
        }
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("stage", &self.stage)
            .field("dispatch", &self.dispatch)
            .field("short_circuit", &self.short_circuit)
            .finish_non_exhaustive()
    }
}

/// Ordered list of continuations waiting on a pending value.
pub(crate) struct Registry<T: 'static> {
    entries: Vec<Continuation<T>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, continuation: Continuation<T>) {
        self.entries.push(continuation);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every entry, leaving the registry empty.
    pub(crate) fn take(&mut self) -> Vec<Continuation<T>> {
        std::mem::take(&mut self.entries)
    }

    /// Fire `entries` in registration order, each with its own copy of `outcome`.
    pub(crate) fn fire_all(entries: Vec<Continuation<T>>, outcome: &Result<T>) {
        for continuation in entries {
            continuation.fire(outcome.clone());
        }
    }
}

impl<T: 'static> Drop for Registry<T> {
    /// Entries own their downstream values, which own further registries.
    /// Tearing them down through the trampoline keeps dropping an
    /// unfired chain from recursing once per stage.
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        trampoline::run(move || drop(entries));
    }
}

/// Run user code, turning a panic into a [`Panicked`](crate::error::ErrorKind::Panicked) error.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Error::panicked(payload.as_ref()))
}
