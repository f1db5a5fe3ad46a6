//! Transformation stages: map, consume, run and flat_map.
//!
//! Each stage returns a new [`Deferred`] immediately and never blocks.
//!
//! # Semantics
//!
//! On upstream success the stage function runs once and its result settles
//! the downstream value. A panic (or `Err` from `try_map`) fails the
//! downstream instead; it is never left pending.
//!
//! On upstream failure the function is **not** invoked and the downstream
//! fails with a [`Composition`](crate::error::ErrorKind::Composition) error
//! whose [`cause`](crate::error::Error::cause) is the upstream error.
//!
//! # Dispatch forms
//!
//! | Form | Where the function runs |
//! |------|-------------------------|
//! | `map(f)` | the thread that completed the upstream |
//! | `map_with(dispatch, f)` | per [`Dispatch`] |
//! | `map_async(f)` | the default pool |

use crate::deferred::registry::{guarded, Continuation, Dispatch, StageKind};
use crate::deferred::Deferred;
use crate::error::{Error, Result};

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Registers a value-driven stage whose function may fail.
    ///
    /// Shared by every short-circuiting stage: `f` only ever sees values.
    pub(crate) fn then_stage<U, F>(&self, stage: StageKind, dispatch: Dispatch, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let target = Deferred::pending();
        let out = target.clone();
        let rejected = target.clone();
        self.add_continuation(Continuation::stage(
            stage,
            dispatch,
            move |outcome: Result<T>| {
                let result = match outcome {
                    Ok(value) => guarded(move || f(value)).and_then(|r| r),
                    Err(err) => Err(Error::composition(err)),
                };
                out.settle(stage, result);
            },
            move |err| rejected.settle(stage, Err(err)),
        ));
        target
    }

    // --- map ---

    /// Transforms the value with `f` on the completing thread.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_with(Dispatch::Inline, f)
    }

    /// Transforms the value with `f`, dispatched per `dispatch`.
    pub fn map_with<U, F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then_stage(StageKind::Map, dispatch.into(), move |value| Ok(f(value)))
    }

    /// Transforms the value with `f` on the default pool.
    pub fn map_async<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_with(Dispatch::default_pool(), f)
    }

    // --- try_map ---

    /// Transforms the value with a fallible `f`; `Err` fails the downstream.
    pub fn try_map<U, E, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        E: Into<Error>,
        F: FnOnce(T) -> core::result::Result<U, E> + Send + 'static,
    {
        self.try_map_with(Dispatch::Inline, f)
    }

    /// Fallible transform dispatched per `dispatch`.
    pub fn try_map_with<U, E, F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        E: Into<Error>,
        F: FnOnce(T) -> core::result::Result<U, E> + Send + 'static,
    {
        self.then_stage(StageKind::Map, dispatch.into(), move |value| {
            f(value).map_err(Into::into)
        })
    }

    /// Fallible transform on the default pool.
    pub fn try_map_async<U, E, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        E: Into<Error>,
        F: FnOnce(T) -> core::result::Result<U, E> + Send + 'static,
    {
        self.try_map_with(Dispatch::default_pool(), f)
    }

    // --- consume ---

    /// Passes the value to `f`; the downstream completes once `f` returns.
    pub fn consume<F>(&self, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.consume_with(Dispatch::Inline, f)
    }

    /// `consume` dispatched per `dispatch`.
    pub fn consume_with<F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.then_stage(StageKind::Consume, dispatch.into(), move |value| {
            f(value);
            Ok(())
        })
    }

    /// `consume` on the default pool.
    pub fn consume_async<F>(&self, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.consume_with(Dispatch::default_pool(), f)
    }

    // --- run ---

    /// Runs `f` after the value succeeds, ignoring the value itself.
    pub fn run<F>(&self, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_with(Dispatch::Inline, f)
    }

    /// `run` dispatched per `dispatch`.
    pub fn run_with<F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_stage(StageKind::Run, dispatch.into(), move |_| {
            f();
            Ok(())
        })
    }

    /// `run` on the default pool.
    pub fn run_async<F>(&self, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_with(Dispatch::default_pool(), f)
    }

    // --- flat_map ---

    /// Chains a stage that itself returns a deferred value.
    ///
    /// The downstream adopts the outcome of the value returned by `f`,
    /// success or failure, instead of nesting it.
    pub fn flat_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        self.flat_map_with(Dispatch::Inline, f)
    }

    /// `flat_map` with `f` dispatched per `dispatch`.
    pub fn flat_map_with<U, F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        let target = Deferred::pending();
        let out = target.clone();
        let rejected = target.clone();
        self.add_continuation(Continuation::stage(
            StageKind::FlatMap,
            dispatch.into(),
            move |outcome: Result<T>| {
                let inner = match outcome {
                    Ok(value) => guarded(move || f(value)),
                    Err(err) => Err(Error::composition(err)),
                };
                match inner {
                    Ok(inner) => {
                        tracing::trace!(
                            deferred_id = out.id(),
                            inner_id = inner.id(),
                            "flat_map adopting inner value"
                        );
                        inner.add_continuation(Continuation::observer(
                            StageKind::FlatMap,
                            move |adopted| out.settle(StageKind::FlatMap, adopted),
                        ));
                    }
                    Err(err) => out.settle(StageKind::FlatMap, Err(err)),
                }
            },
            move |err| rejected.settle(StageKind::FlatMap, Err(err)),
        ));
        target
    }

    /// `flat_map` with `f` run on the default pool.
    pub fn flat_map_async<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        self.flat_map_with(Dispatch::default_pool(), f)
    }
}
