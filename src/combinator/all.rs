//! Barrier combinators: wait for every member to reach a terminal state.
//!
//! # Semantics
//!
//! `all_of(members)` completes once **every** member is fulfilled or failed.
//! It never completes early, even after a member fails. If any member
//! failed, the barrier fails with the first failure observed, wrapped as a
//! composition error. An empty member list completes immediately.
//!
//! `join_all(members)` follows the same rule and additionally collects the
//! member values in input order.
//!
//! Members must share a value type; map heterogeneous values to `()` first
//! when only the barrier itself matters:
//!
//! ```
//! use deferred::{all_of, Deferred};
//!
//! let a = Deferred::completed(1_u32);
//! let b = Deferred::completed("two");
//! let done = all_of(&[a.map(|_| ()), b.map(|_| ())]);
//! assert!(done.wait().is_ok());
//! ```

use crate::deferred::registry::{Continuation, StageKind};
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

struct BarrierNode<T> {
    remaining: usize,
    values: Vec<Option<T>>,
    first_error: Option<Error>,
}

impl<T> BarrierNode<T> {
    /// Records one member outcome. Returns the barrier outcome once the last
    /// member has arrived.
    fn arrive(&mut self, index: usize, outcome: Result<T>) -> Option<Result<Vec<T>>> {
        match outcome {
            Ok(value) => self.values[index] = Some(value),
            Err(err) => {
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
            }
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        Some(match self.first_error.take() {
            Some(err) => Err(Error::composition(err)),
            None => Ok(self.values.drain(..).flatten().collect()),
        })
    }
}

fn barrier<T>(stage: StageKind, members: &[Deferred<T>]) -> Deferred<Vec<T>>
where
    T: Clone + Send + 'static,
{
    if members.is_empty() {
        return Deferred::completed(Vec::new());
    }

    let target = Deferred::pending();
    let node = Arc::new(Mutex::new(BarrierNode {
        remaining: members.len(),
        values: (0..members.len()).map(|_| None).collect(),
        first_error: None,
    }));

    for (index, member) in members.iter().enumerate() {
        let node = Arc::clone(&node);
        let target = target.clone();
        member.add_continuation(Continuation::observer(stage, move |outcome| {
            let done = node.lock().arrive(index, outcome);
            if let Some(outcome) = done {
                target.settle(stage, outcome);
            }
        }));
    }
    target
}

/// Completes once every member has completed; fails if any member failed.
pub fn all_of<T>(members: &[Deferred<T>]) -> Deferred<()>
where
    T: Clone + Send + 'static,
{
    let target = Deferred::pending();
    let out = target.clone();
    barrier(StageKind::AllOf, members).add_continuation(Continuation::observer(
        StageKind::AllOf,
        move |outcome: Result<Vec<T>>| out.settle(StageKind::AllOf, outcome.map(drop)),
    ));
    target
}

/// Completes with every member's value, in input order, once all have completed.
///
/// ```
/// use deferred::{join_all, Deferred};
///
/// let quotes = vec![Deferred::completed(3_u32), Deferred::completed(1), Deferred::completed(2)];
/// assert_eq!(join_all(&quotes).wait().unwrap(), vec![3, 1, 2]);
/// ```
pub fn join_all<T>(members: &[Deferred<T>]) -> Deferred<Vec<T>>
where
    T: Clone + Send + 'static,
{
    barrier(StageKind::AllOf, members)
}
