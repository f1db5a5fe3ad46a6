//! Race combinators: the first member to reach a terminal state wins.
//!
//! # Semantics
//!
//! `a.either(&b, f)` and `any_of(members)` resolve with whichever upstream
//! completes **first**, success or failure. Later outcomes still complete
//! their own values but are not observed here.
//!
//! - A winning value is handed to `f` (or returned as-is by `any_of`).
//! - A winning failure fails the result with a composition error and `f`
//!   never runs.
//! - An empty `any_of` never completes.
//!
//! When two members complete at effectively the same instant the winner is
//! whichever thread reaches the race node first; no tie-break order is
//! promised.

use crate::deferred::registry::{Continuation, Dispatch, StageKind};
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Settles a new value with the first outcome among `members`.
fn race<T>(stage: StageKind, members: &[Deferred<T>]) -> Deferred<T>
where
    T: Clone + Send + 'static,
{
    let target = Deferred::pending();
    let fired = Arc::new(AtomicBool::new(false));

    for (index, member) in members.iter().enumerate() {
        let fired = Arc::clone(&fired);
        let target = target.clone();
        member.add_continuation(Continuation::observer(stage, move |outcome: Result<T>| {
            if fired.swap(true, Ordering::AcqRel) {
                return;
            }
            tracing::trace!(
                deferred_id = target.id(),
                stage = %stage,
                winner = index,
                fulfilled = outcome.is_ok(),
                "race decided"
            );
            target.settle(stage, outcome);
        }));
    }
    target
}

/// Completes with the outcome of whichever member completes first.
///
/// A failing winner is reported as a composition error wrapping its cause.
/// With no members the result stays pending forever.
pub fn any_of<T>(members: &[Deferred<T>]) -> Deferred<T>
where
    T: Clone + Send + 'static,
{
    if members.is_empty() {
        tracing::debug!("any_of called with no members; result never completes");
    }
    let target = Deferred::pending();
    let out = target.clone();
    race(StageKind::AnyOf, members).add_continuation(Continuation::observer(
        StageKind::AnyOf,
        move |outcome: Result<T>| out.settle(StageKind::AnyOf, outcome.map_err(Error::composition)),
    ));
    target
}

impl<T: Clone + Send + 'static> Deferred<T> {
    fn race_with(&self, other: &Self) -> Self {
        race(StageKind::Either, &[self.clone(), other.clone()])
    }

    // --- either ---

    /// Applies `f` to whichever of `self` and `other` completes first.
    pub fn either<U, F>(&self, other: &Self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.either_with(other, Dispatch::Inline, f)
    }

    /// `either` with `f` dispatched per `dispatch`.
    pub fn either_with<U, F>(&self, other: &Self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.race_with(other)
            .then_stage(StageKind::Either, dispatch.into(), move |value| Ok(f(value)))
    }

    /// `either` with `f` run on the default pool.
    pub fn either_async<U, F>(&self, other: &Self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.either_with(other, Dispatch::default_pool(), f)
    }

    // --- either_consume ---

    /// Passes the first value to arrive to `f`.
    pub fn either_consume<F>(&self, other: &Self, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.either_consume_with(other, Dispatch::Inline, f)
    }

    /// `either_consume` dispatched per `dispatch`.
    pub fn either_consume_with<F>(
        &self,
        other: &Self,
        dispatch: impl Into<Dispatch>,
        f: F,
    ) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.either_with(other, dispatch, f)
    }

    /// `either_consume` on the default pool.
    pub fn either_consume_async<F>(&self, other: &Self, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.either_consume_with(other, Dispatch::default_pool(), f)
    }

    // --- either_run ---

    /// Runs `f` once either value completes successfully first.
    pub fn either_run<F>(&self, other: &Self, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.either_run_with(other, Dispatch::Inline, f)
    }

    /// `either_run` dispatched per `dispatch`.
    pub fn either_run_with<F>(&self, other: &Self, dispatch: impl Into<Dispatch>, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.either_with(other, dispatch, move |_| f())
    }

    /// `either_run` on the default pool.
    pub fn either_run_async<F>(&self, other: &Self, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.either_run_with(other, Dispatch::default_pool(), f)
    }
}
