//! Single-assignment deferred values.
//!
//! A [`Deferred<T>`] starts pending and is completed at most once, either
//! fulfilled with a value or failed with an [`Error`]. Stages chained on it
//! (see [`crate::combinator`]) register continuations that fire when it
//! reaches a terminal state.
//!
//! # State machine
//!
//! ```text
//!            complete(v)
//! Pending ───────────────▶ Fulfilled(v)
//!    │
//!    │ fail(e) / cancel()
//!    ▼
//! Failed(e)
//! ```
//!
//! A second terminal write returns [`ErrorKind::DoubleCompletion`] and never
//! overwrites the first.
//!
//! # Locking discipline
//!
//! State and registry sit behind one mutex. A terminal write locks, checks
//! for `Pending`, stores the outcome, takes the registry and releases the
//! lock before any continuation runs. Registration locks, checks, and either
//! appends (pending) or releases and fires (terminal). User code never runs
//! under the lock, so a continuation may freely register further stages on
//! the value that triggered it.
//!
//! Continuations released by a terminal write run through a per-thread
//! work list, so completing or dropping a chain of any length uses
//! constant stack. A value settled from inside an inline
//! continuation fires its own continuations once the current one returns.
//! An inline continuation therefore must not block waiting on a value that
//! the same completion pass settles.
//!
//! # Waiting
//!
//! Only [`Deferred::wait`], [`Deferred::wait_timeout`] and [`Deferred::get`]
//! block. A bounded wait that gives up returns [`ErrorKind::Timeout`] and
//! leaves the value untouched.
//!
//! [`ErrorKind::DoubleCompletion`]: crate::error::ErrorKind::DoubleCompletion
//! [`ErrorKind::Timeout`]: crate::error::ErrorKind::Timeout

pub mod producer;
pub mod registry;
pub(crate) mod trampoline;

pub use producer::{
    run_async, run_async_on, supply_async, supply_async_on, try_supply_async,
    try_supply_async_on,
};
pub use registry::{Dispatch, StageKind};

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use registry::{Continuation, Registry};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_DEFERRED_ID: AtomicU64 = AtomicU64::new(1);

/// Terminal or pending state of a deferred value.
enum State<T> {
    Pending,
    Fulfilled(T),
    Failed(Error),
}

impl<T: Clone> State<T> {
    const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns a copy of the terminal outcome, or `None` while pending.
    fn snapshot(&self) -> Option<Result<T>> {
        match self {
            Self::Pending => None,
            Self::Fulfilled(value) => Some(Ok(value.clone())),
            Self::Failed(err) => Some(Err(err.clone())),
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Fulfilled(_) => "Fulfilled",
            Self::Failed(_) => "Failed",
        }
    }
}

struct Slot<T: 'static> {
    state: State<T>,
    registry: Registry<T>,
}

struct Inner<T: 'static> {
    id: u64,
    slot: Mutex<Slot<T>>,
    completed: Condvar,
}

/// A single-assignment value that becomes available asynchronously.
///
/// `Deferred` is a cheap handle: clones share the same underlying cell.
/// Values are handed to each continuation by clone, hence the `T: Clone`
/// bound on the operations.
///
/// ```
/// use deferred::Deferred;
///
/// let price = Deferred::pending();
/// let with_tax = price.map(|p: u32| p * 2);
/// price.complete(21).unwrap();
/// assert_eq!(with_tax.wait().unwrap(), 42);
/// ```
pub struct Deferred<T: 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Creates a new pending value.
    #[must_use]
    pub fn pending() -> Self {
        Self::with_state(State::Pending)
    }

    /// Creates a value that is already fulfilled.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self::with_state(State::Fulfilled(value))
    }

    /// Creates a value that has already failed.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::with_state(State::Failed(error))
    }

    fn with_state(state: State<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_DEFERRED_ID.fetch_add(1, Ordering::Relaxed),
                slot: Mutex::new(Slot {
                    state,
                    registry: Registry::new(),
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// Returns the process-unique id of this value.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Fulfills a pending value and fires its continuations.
    ///
    /// Returns a [`DoubleCompletion`](crate::error::ErrorKind::DoubleCompletion)
    /// error if the value was already completed.
    pub fn complete(&self, value: T) -> Result<()> {
        self.try_settle(Ok(value))
    }

    /// Fails a pending value and fires its continuations.
    ///
    /// Returns a [`DoubleCompletion`](crate::error::ErrorKind::DoubleCompletion)
    /// error if the value was already completed.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.try_settle(Err(error))
    }

    /// Fails a pending value with a [`Cancelled`](crate::error::ErrorKind::Cancelled) error.
    ///
    /// Returns `true` if this call performed the transition. Work already
    /// running is not interrupted; a pooled producer that has not started
    /// yet skips its work. Dependent stages observe the cancellation as an
    /// ordinary failure.
    pub fn cancel(&self) -> bool {
        let cancelled = self.try_settle(Err(Error::cancelled())).is_ok();
        if cancelled {
            tracing::debug!(deferred_id = self.id(), "deferred cancelled");
        }
        cancelled
    }

    /// Performs the terminal write.
    pub(crate) fn try_settle(&self, outcome: Result<T>) -> Result<()> {
        let continuations = {
            let mut slot = self.inner.slot.lock();
            if !slot.state.is_pending() {
                return Err(Error::double_completion(self.id()));
            }
            slot.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(err) => State::Failed(err.clone()),
            };
            let continuations = slot.registry.take();
            self.inner.completed.notify_all();
            continuations
        };

        tracing::trace!(
            deferred_id = self.id(),
            fulfilled = outcome.is_ok(),
            continuations = continuations.len(),
            "deferred completed"
        );
        if !continuations.is_empty() {
            trampoline::run(move || Registry::fire_all(continuations, &outcome));
        }
        Ok(())
    }

    /// Terminal write on behalf of a stage.
    ///
    /// The target may legitimately be complete already (cancelled by its
    /// owner, or completed by hand), in which case the stage result is dropped.
    pub(crate) fn settle(&self, stage: StageKind, outcome: Result<T>) {
        if let Err(err) = self.try_settle(outcome) {
            tracing::debug!(
                deferred_id = self.id(),
                stage = %stage,
                error = %err,
                "stage result discarded"
            );
        }
    }

    /// Registers a continuation, firing it now if the value is already terminal.
    pub(crate) fn add_continuation(&self, continuation: Continuation<T>) {
        let outcome = {
            let mut slot = self.inner.slot.lock();
            match slot.state.snapshot() {
                Some(outcome) => outcome,
                None => {
                    tracing::trace!(
                        deferred_id = self.id(),
                        stage = %continuation.kind(),
                        queued = slot.registry.len() + 1,
                        "continuation queued"
                    );
                    slot.registry.push(continuation);
                    return;
                }
            }
        };
        continuation.fire(outcome);
    }

    /// Blocks until the value is terminal and returns its outcome.
    pub fn wait(&self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(outcome) = slot.state.snapshot() {
                return outcome;
            }
            self.inner.completed.wait(&mut slot);
        }
    }

    /// Blocks until the value is terminal or `timeout` elapses.
    ///
    /// On timeout returns a [`Timeout`](crate::error::ErrorKind::Timeout)
    /// error; the value itself is not affected. A timeout too large to
    /// represent as a deadline waits indefinitely.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(outcome) = slot.state.snapshot() {
                return outcome;
            }
            if self
                .inner
                .completed
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return slot
                    .state
                    .snapshot()
                    .unwrap_or_else(|| Err(Error::timeout(timeout)));
            }
        }
    }

    /// Waits with an optional bound; `None` blocks indefinitely.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }

    /// Returns the outcome without blocking, or `None` while pending.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T>> {
        self.inner.slot.lock().state.snapshot()
    }

    /// Returns the value if fulfilled, `default` while pending, or the error if failed.
    pub fn get_now(&self, default: T) -> Result<T> {
        self.try_get().unwrap_or(Ok(default))
    }

    /// Returns true once the value is fulfilled or failed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !self.inner.slot.lock().state.is_pending()
    }

    /// Returns true if the value is fulfilled.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.slot.lock().state, State::Fulfilled(_))
    }

    /// Returns true if the value failed, including by cancellation.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.slot.lock().state, State::Failed(_))
    }

    /// Returns true if the value was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(&self.inner.slot.lock().state, State::Failed(err) if err.is_cancelled())
    }
}

impl<T> fmt::Debug for Deferred<T>
where
    T: Clone + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("Deferred")
            .field("id", &self.inner.id)
            .field("state", &slot.state.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn complete_then_wait() {
        init_test("complete_then_wait");
        let value = Deferred::pending();
        assert!(!value.is_done());
        value.complete(5_u32).unwrap();
        assert!(value.is_done());
        assert!(value.is_fulfilled());
        assert_eq!(value.wait().unwrap(), 5);
        crate::test_complete!("complete_then_wait");
    }

    #[test]
    fn second_write_is_rejected() {
        init_test("second_write_is_rejected");
        let value = Deferred::pending();
        value.complete(1_u32).unwrap();

        let err = value.complete(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleCompletion);
        let err = value.fail(Error::computation("late")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleCompletion);
        assert_eq!(value.wait().unwrap(), 1);
        crate::test_complete!("second_write_is_rejected");
    }

    #[test]
    fn failed_value_reports_error() {
        init_test("failed_value_reports_error");
        let value = Deferred::<u32>::pending();
        value.fail(Error::computation("no price")).unwrap();
        assert!(value.is_failed());
        assert_eq!(value.wait().unwrap_err(), Error::computation("no price"));
        crate::test_complete!("failed_value_reports_error");
    }

    #[test]
    fn wait_timeout_leaves_value_pending() {
        init_test("wait_timeout_leaves_value_pending");
        let value = Deferred::<u32>::pending();
        let err = value.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        assert!(!value.is_done());

        value.complete(9).unwrap();
        assert_eq!(value.get(Some(Duration::from_millis(20))).unwrap(), 9);
        crate::test_complete!("wait_timeout_leaves_value_pending");
    }

    #[test]
    fn unbounded_timeout_waits_for_the_value() {
        init_test("unbounded_timeout_waits_for_the_value");
        assert_eq!(Deferred::completed(1_u32).get(Some(Duration::MAX)).unwrap(), 1);

        let value = Deferred::pending();
        let writer = value.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.complete(7_u32).unwrap();
        });
        assert_eq!(value.wait_timeout(Duration::MAX).unwrap(), 7);
        t.join().unwrap();
        crate::test_complete!("unbounded_timeout_waits_for_the_value");
    }

    #[test]
    fn wait_wakes_on_completion_from_other_thread() {
        init_test("wait_wakes_on_completion_from_other_thread");
        let value = Deferred::pending();
        let writer = value.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.complete(String::from("done")).unwrap();
        });
        assert_eq!(value.get(None).unwrap(), "done");
        t.join().unwrap();
        crate::test_complete!("wait_wakes_on_completion_from_other_thread");
    }

    #[test]
    fn try_get_and_get_now() {
        init_test("try_get_and_get_now");
        let value = Deferred::<u32>::pending();
        assert!(value.try_get().is_none());
        assert_eq!(value.get_now(7).unwrap(), 7);

        value.complete(3).unwrap();
        assert_eq!(value.try_get().unwrap().unwrap(), 3);
        assert_eq!(value.get_now(7).unwrap(), 3);

        let failed = Deferred::<u32>::failed(Error::computation("x"));
        assert!(failed.get_now(7).is_err());
        crate::test_complete!("try_get_and_get_now");
    }

    #[test]
    fn cancel_only_affects_pending() {
        init_test("cancel_only_affects_pending");
        let value = Deferred::<u32>::pending();
        assert!(value.cancel());
        assert!(value.is_cancelled());
        assert!(!value.cancel());
        assert!(value.wait().unwrap_err().is_cancelled());

        let done = Deferred::completed(1_u32);
        assert!(!done.cancel());
        assert!(!done.is_cancelled());
        crate::test_complete!("cancel_only_affects_pending");
    }

    #[test]
    fn continuations_fire_once_in_order() {
        init_test("continuations_fire_once_in_order");
        let value = Deferred::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let s = Arc::clone(&seen);
            value.add_continuation(Continuation::observer(StageKind::Map, move |o: Result<u32>| {
                s.lock().push((i, o.unwrap()));
            }));
        }
        value.complete(11).unwrap();
        let _ = value.complete(12);
        assert_eq!(*seen.lock(), vec![(0, 11), (1, 11), (2, 11), (3, 11)]);
        crate::test_complete!("continuations_fire_once_in_order");
    }

    #[test]
    fn late_registration_fires_immediately() {
        init_test("late_registration_fires_immediately");
        let value = Deferred::completed(4_u32);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        value.add_continuation(Continuation::observer(StageKind::Handle, move |o| {
            assert_eq!(o.unwrap(), 4);
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        crate::test_complete!("late_registration_fires_immediately");
    }

    #[test]
    fn continuation_may_register_on_same_value() {
        init_test("continuation_may_register_on_same_value");
        let value = Deferred::pending();
        let fired = Arc::new(AtomicUsize::new(0));
        let v = value.clone();
        let f = Arc::clone(&fired);
        value.add_continuation(Continuation::observer(StageKind::Map, move |_: Result<u32>| {
            let f2 = Arc::clone(&f);
            v.add_continuation(Continuation::observer(StageKind::Map, move |_| {
                f2.fetch_add(1, Ordering::SeqCst);
            }));
            f.fetch_add(1, Ordering::SeqCst);
        }));
        value.complete(1).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        crate::test_complete!("continuation_may_register_on_same_value");
    }

    #[test]
    fn concurrent_writers_single_winner() {
        init_test("concurrent_writers_single_winner");
        let value = Deferred::pending();
        let wins = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();
        for i in 0..8_u32 {
            let v = value.clone();
            let w = Arc::clone(&wins);
            threads.push(thread::spawn(move || {
                if v.complete(i).is_ok() {
                    w.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(value.wait().unwrap() < 8);
        crate::test_complete!("concurrent_writers_single_winner");
    }

    #[test]
    fn debug_shows_state() {
        init_test("debug_shows_state");
        let value = Deferred::<u32>::pending();
        assert!(format!("{value:?}").contains("Pending"));
        value.complete(1).unwrap();
        assert!(format!("{value:?}").contains("Fulfilled"));
        crate::test_complete!("debug_shows_state");
    }

    const DEEP: u32 = 100_000;

    #[test]
    fn completing_a_deep_inline_chain() {
        init_test("completing_a_deep_inline_chain");
        let head = Deferred::pending();
        let mut tail = head.map(|v: u32| v + 1);
        for _ in 1..DEEP {
            tail = tail.map(|v| v + 1);
        }
        head.complete(0).unwrap();
        assert_eq!(tail.try_get().unwrap().unwrap(), DEEP);
        assert_eq!(trampoline::queued(), 0);
        crate::test_complete!("completing_a_deep_inline_chain");
    }

    #[test]
    fn dropping_a_deep_pending_chain() {
        init_test("dropping_a_deep_pending_chain");
        let head = Deferred::<u32>::pending();
        let mut tail = head.map(|v| v + 1);
        for _ in 1..DEEP {
            tail = tail.map(|v| v + 1);
        }
        drop(tail);
        drop(head);
        assert_eq!(trampoline::queued(), 0);
        crate::test_complete!("dropping_a_deep_pending_chain");
    }

    #[test]
    fn deep_flat_map_adoption_chain() {
        init_test("deep_flat_map_adoption_chain");
        let head = Deferred::pending();
        let mut tail = head.flat_map(|v: u32| Deferred::completed(v + 1));
        for _ in 1..DEEP / 5 {
            tail = tail.flat_map(|v| Deferred::completed(v + 1));
        }
        head.complete(0).unwrap();
        assert_eq!(tail.wait().unwrap(), DEEP / 5);
        crate::test_complete!("deep_flat_map_adoption_chain");
    }

    #[test]
    fn continuations_settled_inside_a_stage_fire_before_complete_returns() {
        init_test("continuations_settled_inside_a_stage_fire_before_complete_returns");
        let head = Deferred::pending();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        let next = head.map(move |v: u32| {
            o.lock().push("first stage");
            v * 2
        });
        let o = Arc::clone(&order);
        let last = next.map(move |v| {
            o.lock().push("second stage");
            v + 1
        });
        let o = Arc::clone(&order);
        let _sibling = head.map(move |v| {
            o.lock().push("sibling");
            v
        });

        head.complete(4).unwrap();
        assert_eq!(last.try_get().unwrap().unwrap(), 9);
        assert_eq!(*order.lock(), vec!["first stage", "sibling", "second stage"]);
        crate::test_complete!("continuations_settled_inside_a_stage_fire_before_complete_returns");
    }
}
