//! Property-based tests for deferred-value laws.
//!
//! # Completion
//! - Single completion: exactly one terminal write succeeds, later writes are rejected
//! - Registration order: continuations registered before completion fire in order
//!
//! # Stage Laws
//! - Short-circuit: a failed upstream never invokes a map chain
//! - Map fusion: `map(f).map(g)` ≃ `map(g ∘ f)`
//! - Recovery unconditionality: `handle` runs exactly once and always fulfills
//!
//! # Combinator Laws
//! - Join failure: `combine` fails iff either side fails
//! - Barrier: `join_all` preserves input order regardless of completion order
//! - Race: `any_of` reports the first member completed

#[macro_use]
mod common;

use common::*;
use deferred::{any_of, join_all, Deferred, Error, ErrorKind};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// A terminal write applied to a deferred value.
#[derive(Debug, Clone)]
enum TerminalWrite {
    Complete(i64),
    Fail(String),
    Cancel,
}

fn arb_write() -> impl Strategy<Value = TerminalWrite> {
    prop_oneof![
        any::<i64>().prop_map(TerminalWrite::Complete),
        "[a-z]{1,8}".prop_map(TerminalWrite::Fail),
        Just(TerminalWrite::Cancel),
    ]
}

fn apply(value: &Deferred<i64>, write: &TerminalWrite) -> bool {
    match write {
        TerminalWrite::Complete(v) => value.complete(*v).is_ok(),
        TerminalWrite::Fail(msg) => value.fail(Error::computation(msg.clone())).is_ok(),
        TerminalWrite::Cancel => value.cancel(),
    }
}

fn arb_outcome() -> impl Strategy<Value = Result<i32, String>> {
    prop_oneof![
        any::<i32>().prop_map(Ok),
        "[a-z]{1,8}".prop_map(Err),
    ]
}

fn settle(value: &Deferred<i32>, outcome: &Result<i32, String>) {
    match outcome {
        Ok(v) => value.complete(*v).unwrap(),
        Err(msg) => value.fail(Error::computation(msg.clone())).unwrap(),
    }
}

/// A permutation of `0..n`.
fn arb_permutation(max: usize) -> impl Strategy<Value = Vec<usize>> {
    (1..=max).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
}

// ============================================================================
// Completion Properties
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(256))]

    /// Exactly the first write succeeds and determines the final state.
    #[test]
    fn single_completion(writes in proptest::collection::vec(arb_write(), 1..8)) {
        init_test_logging();
        let value = Deferred::pending();
        let accepted: Vec<bool> = writes.iter().map(|w| apply(&value, w)).collect();

        prop_assert!(accepted[0]);
        prop_assert!(accepted[1..].iter().all(|ok| !ok));
        match (&writes[0], value.wait()) {
            (TerminalWrite::Complete(v), Ok(got)) => prop_assert_eq!(*v, got),
            (TerminalWrite::Fail(msg), Err(err)) => {
                prop_assert_eq!(err.kind(), ErrorKind::Computation);
                prop_assert_eq!(err.message(), Some(msg.as_str()));
            }
            (TerminalWrite::Cancel, Err(err)) => prop_assert!(err.is_cancelled()),
            (write, outcome) => prop_assert!(false, "{write:?} produced {outcome:?}"),
        }
    }

    /// Continuations registered while pending fire once each, in order.
    #[test]
    fn registration_order(count in 1_usize..32, value in any::<i64>()) {
        init_test_logging();
        let upstream = Deferred::pending();
        let order = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<_> = (0..count)
            .map(|i| {
                let o = Arc::clone(&order);
                upstream.consume(move |v: i64| o.lock().push((i, v)))
            })
            .collect();
        upstream.complete(value).unwrap();
        for stage in &stages {
            prop_assert!(stage.wait().is_ok());
        }
        let expected: Vec<_> = (0..count).map(|i| (i, value)).collect();
        prop_assert_eq!(order.lock().clone(), expected);
    }
}

// ============================================================================
// Stage Properties
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(256))]

    /// A failed upstream never invokes any stage in a map chain.
    #[test]
    fn short_circuit(depth in 1_usize..10, msg in "[a-z]{1,8}") {
        init_test_logging();
        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = Deferred::<i64>::pending();
        let mut tail = upstream.clone();
        for _ in 0..depth {
            let c = Arc::clone(&calls);
            tail = tail.map(move |v| {
                c.fetch_add(1, Ordering::SeqCst);
                v + 1
            });
        }
        upstream.fail(Error::computation(msg.clone())).unwrap();

        let err = tail.wait().unwrap_err();
        prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
        prop_assert_eq!(err.kind(), ErrorKind::Composition);
        prop_assert_eq!(err.root_cause(), &Error::computation(msg));
    }

    /// `map(f).map(g)` yields the same value as `map(g ∘ f)`.
    #[test]
    fn map_fusion(v in any::<i32>(), a in any::<i32>(), b in 1_i32..100) {
        init_test_logging();
        let f = move |x: i32| x.wrapping_add(a);
        let g = move |x: i32| x.wrapping_mul(b);
        let chained = Deferred::completed(v).map(f).map(g).wait().unwrap();
        let fused = Deferred::completed(v).map(move |x| g(f(x))).wait().unwrap();
        prop_assert_eq!(chained, fused);
    }

    /// `handle` runs exactly once and always fulfills its downstream.
    #[test]
    fn handle_unconditional(outcome in arb_outcome()) {
        init_test_logging();
        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = Deferred::pending();
        let c = Arc::clone(&calls);
        let handled = upstream.handle(move |o: deferred::Result<i32>| {
            c.fetch_add(1, Ordering::SeqCst);
            o.is_ok()
        });
        settle(&upstream, &outcome);

        prop_assert_eq!(handled.wait().unwrap(), outcome.is_ok());
        prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Combinator Properties
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(256))]

    /// `combine` fails iff either side fails, in either completion order.
    #[test]
    fn join_failure_propagation(
        left in arb_outcome(),
        right in arb_outcome(),
        left_first in any::<bool>()
    ) {
        init_test_logging();
        let a = Deferred::pending();
        let b = Deferred::pending();
        let joined = a.combine(&b, |x: i32, y: i32| i64::from(x) + i64::from(y));
        if left_first {
            settle(&a, &left);
            settle(&b, &right);
        } else {
            settle(&b, &right);
            settle(&a, &left);
        }

        match (&left, &right, joined.wait()) {
            (Ok(x), Ok(y), Ok(sum)) => prop_assert_eq!(sum, i64::from(*x) + i64::from(*y)),
            (Ok(_), Ok(_), Err(err)) => prop_assert!(false, "unexpected failure {err}"),
            (_, _, Ok(sum)) => prop_assert!(false, "failure swallowed, got {sum}"),
            (_, _, Err(err)) => {
                let first_failure = match (left_first, &left, &right) {
                    (true, Err(msg), _) | (false, _, Err(msg)) => msg,
                    (_, Err(msg), _) | (_, _, Err(msg)) => msg,
                    _ => unreachable!(),
                };
                prop_assert_eq!(err.root_cause(), &Error::computation(first_failure.clone()));
            }
        }
    }

    /// `join_all` returns values in input order whatever the completion order.
    #[test]
    fn barrier_preserves_order(order in arb_permutation(12)) {
        init_test_logging();
        let members: Vec<Deferred<usize>> = order.iter().map(|_| Deferred::pending()).collect();
        let joined = join_all(&members);
        for (step, &index) in order.iter().enumerate() {
            prop_assert!(!joined.is_done(), "barrier fired after {} members", step);
            members[index].complete(index * 10).unwrap();
        }
        let expected: Vec<usize> = (0..order.len()).map(|i| i * 10).collect();
        prop_assert_eq!(joined.wait().unwrap(), expected);
    }

    /// `any_of` reports whichever member completes first.
    #[test]
    fn race_first_member_wins(order in arb_permutation(8)) {
        init_test_logging();
        let members: Vec<Deferred<usize>> = order.iter().map(|_| Deferred::pending()).collect();
        let first = any_of(&members);
        for &index in &order {
            members[index].complete(index).unwrap();
        }
        prop_assert_eq!(first.wait().unwrap(), order[0]);
    }
}
