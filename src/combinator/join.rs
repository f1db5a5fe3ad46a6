//! Join combinator: wait for two values, then combine them.
//!
//! # Semantics
//!
//! `a.combine(&b, f)`:
//! 1. Wait for both `a` and `b` to succeed (order doesn't matter)
//! 2. Run `f(value_a, value_b)` exactly once
//! 3. Settle the result with `f`'s return value
//!
//! **Failure**: if either side fails, the result fails with a composition
//! error wrapping that side's error and `f` never runs. The first failure
//! observed wins; when both fail concurrently either error may be reported.
//! Unlike [`all_of`](super::all_of), the join does not wait for the other
//! side once one has failed.

use crate::deferred::registry::{Continuation, Dispatch, StageKind};
use crate::deferred::Deferred;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared state of a two-way join.
struct JoinNode<A, B> {
    left: Option<A>,
    right: Option<B>,
    fired: bool,
}

impl<A, B> JoinNode<A, B> {
    /// Takes both values once both sides have arrived; marks the node fired.
    fn take_pair(&mut self) -> Option<(A, B)> {
        if self.fired || self.left.is_none() || self.right.is_none() {
            return None;
        }
        self.fired = true;
        self.left.take().zip(self.right.take())
    }

    /// Marks the node fired by a failure; returns false if it already fired.
    fn claim_failure(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        self.left = None;
        self.right = None;
        true
    }
}

/// Joins two values into a pair, failing as soon as either side fails.
pub(crate) fn join2<A, B>(left: &Deferred<A>, right: &Deferred<B>) -> Deferred<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    let target = Deferred::pending();
    let node = Arc::new(Mutex::new(JoinNode {
        left: None,
        right: None,
        fired: false,
    }));

    let (n, t) = (Arc::clone(&node), target.clone());
    left.add_continuation(Continuation::observer(
        StageKind::Combine,
        move |outcome: Result<A>| {
            let ready = match outcome {
                Ok(value) => {
                    let mut node = n.lock();
                    node.left = Some(value);
                    node.take_pair().map(Ok)
                }
                Err(err) => n.lock().claim_failure().then(|| Err(err)),
            };
            settle_join(&t, ready);
        },
    ));

    let (n, t) = (node, target.clone());
    right.add_continuation(Continuation::observer(
        StageKind::Combine,
        move |outcome: Result<B>| {
            let ready = match outcome {
                Ok(value) => {
                    let mut node = n.lock();
                    node.right = Some(value);
                    node.take_pair().map(Ok)
                }
                Err(err) => n.lock().claim_failure().then(|| Err(err)),
            };
            settle_join(&t, ready);
        },
    ));

    target
}

fn settle_join<A, B>(target: &Deferred<(A, B)>, ready: Option<Result<(A, B)>>)
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    match ready {
        Some(outcome) => target.settle(StageKind::Combine, outcome),
        None => tracing::trace!(deferred_id = target.id(), "join waiting for other side"),
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    // --- combine ---

    /// Combines this value with `other` once both succeed.
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let price = Deferred::completed(5199_i64);
    /// let discount = Deferred::completed(200_i64);
    /// let real = price.combine(&discount, |p, d| p - d);
    /// assert_eq!(real.wait().unwrap(), 4999);
    /// ```
    pub fn combine<U, R, F>(&self, other: &Deferred<U>, f: F) -> Deferred<R>
    where
        U: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnOnce(T, U) -> R + Send + 'static,
    {
        self.combine_with(other, Dispatch::Inline, f)
    }

    /// `combine` with `f` dispatched per `dispatch`.
    pub fn combine_with<U, R, F>(
        &self,
        other: &Deferred<U>,
        dispatch: impl Into<Dispatch>,
        f: F,
    ) -> Deferred<R>
    where
        U: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnOnce(T, U) -> R + Send + 'static,
    {
        join2(self, other).then_stage(StageKind::Combine, dispatch.into(), move |(a, b)| {
            Ok(f(a, b))
        })
    }

    /// `combine` with `f` run on the default pool.
    pub fn combine_async<U, R, F>(&self, other: &Deferred<U>, f: F) -> Deferred<R>
    where
        U: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnOnce(T, U) -> R + Send + 'static,
    {
        self.combine_with(other, Dispatch::default_pool(), f)
    }

    // --- combine_consume ---

    /// Passes both values to `f` once both succeed.
    pub fn combine_consume<U, F>(&self, other: &Deferred<U>, f: F) -> Deferred<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T, U) + Send + 'static,
    {
        self.combine_consume_with(other, Dispatch::Inline, f)
    }

    /// `combine_consume` dispatched per `dispatch`.
    pub fn combine_consume_with<U, F>(
        &self,
        other: &Deferred<U>,
        dispatch: impl Into<Dispatch>,
        f: F,
    ) -> Deferred<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T, U) + Send + 'static,
    {
        self.combine_with(other, dispatch, f)
    }

    /// `combine_consume` on the default pool.
    pub fn combine_consume_async<U, F>(&self, other: &Deferred<U>, f: F) -> Deferred<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T, U) + Send + 'static,
    {
        self.combine_consume_with(other, Dispatch::default_pool(), f)
    }

    // --- run_after_both ---

    /// Runs `f` once both values succeed, ignoring the values.
    pub fn run_after_both<U, F>(&self, other: &Deferred<U>, f: F) -> Deferred<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.run_after_both_with(other, Dispatch::Inline, f)
    }

    /// `run_after_both` dispatched per `dispatch`.
    pub fn run_after_both_with<U, F>(
        &self,
        other: &Deferred<U>,
        dispatch: impl Into<Dispatch>,
        f: F,
    ) -> Deferred<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.combine_with(other, dispatch, move |_, _| f())
    }

    /// `run_after_both` on the default pool.
    pub fn run_after_both_async<U, F>(&self, other: &Deferred<U>, f: F) -> Deferred<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.run_after_both_with(other, Dispatch::default_pool(), f)
    }
}
