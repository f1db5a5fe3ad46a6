//! Recovery stages: handle, exceptionally and when_complete.
//!
//! These are the only stages that observe failures instead of
//! short-circuiting past them, and `handle`/`exceptionally` are the only
//! way to turn a failed value back into a fulfilled one.
//!
//! | Stage | Runs on | Downstream |
//! |-------|---------|------------|
//! | `handle(f)` | success and failure | `f(outcome)` |
//! | `exceptionally(f)` | failure only | value, or `f(error)` |
//! | `when_complete(f)` | success and failure | upstream outcome unchanged |
//!
//! A panic inside the recovery function fails the downstream with a
//! [`Panicked`](crate::error::ErrorKind::Panicked) error.

use crate::deferred::registry::{guarded, Continuation, Dispatch, StageKind};
use crate::deferred::Deferred;
use crate::error::{Error, Result};

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Registers a stage whose function sees every outcome.
    fn recovery_stage<U, F>(&self, stage: StageKind, dispatch: Dispatch, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        let target = Deferred::pending();
        let out = target.clone();
        let rejected = target.clone();
        self.add_continuation(Continuation::stage(
            stage,
            dispatch,
            move |outcome| out.settle(stage, f(outcome)),
            move |err| rejected.settle(stage, Err(err)),
        ));
        target
    }

    // --- handle ---

    /// Maps either outcome to a new value; `f` runs exactly once.
    ///
    /// ```
    /// use deferred::{Deferred, Error};
    ///
    /// let failed = Deferred::<u32>::failed(Error::computation("offline"));
    /// let recovered = failed.handle(|outcome| outcome.unwrap_or(0));
    /// assert_eq!(recovered.wait().unwrap(), 0);
    /// ```
    pub fn handle<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.handle_with(Dispatch::Inline, f)
    }

    /// `handle` dispatched per `dispatch`.
    pub fn handle_with<U, F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.recovery_stage(StageKind::Handle, dispatch.into(), move |outcome| {
            guarded(move || f(outcome))
        })
    }

    /// `handle` on the default pool.
    pub fn handle_async<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.handle_with(Dispatch::default_pool(), f)
    }

    // --- exceptionally ---

    /// Replaces a failure with `f(error)`; a value passes through unchanged.
    pub fn exceptionally<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.exceptionally_with(Dispatch::Inline, f)
    }

    /// `exceptionally` dispatched per `dispatch`.
    pub fn exceptionally_with<F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.recovery_stage(StageKind::Exceptionally, dispatch.into(), move |outcome| {
            match outcome {
                Ok(value) => Ok(value),
                Err(err) => {
                    tracing::trace!(error = %err, "recovering failed value");
                    guarded(move || f(err))
                }
            }
        })
    }

    /// `exceptionally` on the default pool.
    pub fn exceptionally_async<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.exceptionally_with(Dispatch::default_pool(), f)
    }

    // --- when_complete ---

    /// Observes the outcome and passes it through unchanged.
    ///
    /// If `f` panics and the upstream had succeeded, the downstream fails
    /// with the panic; an upstream failure is always passed through as-is.
    pub fn when_complete<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.when_complete_with(Dispatch::Inline, f)
    }

    /// `when_complete` dispatched per `dispatch`.
    pub fn when_complete_with<F>(&self, dispatch: impl Into<Dispatch>, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.recovery_stage(StageKind::WhenComplete, dispatch.into(), move |outcome| {
            match guarded(|| f(&outcome)) {
                Err(panic) if outcome.is_ok() => Err(panic),
                _ => outcome,
            }
        })
    }

    /// `when_complete` on the default pool.
    pub fn when_complete_async<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.when_complete_with(Dispatch::default_pool(), f)
    }
}
