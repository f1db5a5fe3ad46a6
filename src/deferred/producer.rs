//! Producers: start a computation on a worker pool and get its deferred result.
//!
//! The `_on` variants take an explicit pool; the others use
//! [`default_pool`](crate::runtime::default_pool). A producer that panics or
//! returns `Err` fails its value. A producer whose pool refuses the work, or
//! discards it during an immediate shutdown, fails its value with
//! [`RejectedSubmission`](crate::error::ErrorKind::RejectedSubmission). If the
//! value is cancelled before a worker picks the work up, the work is skipped.

use super::registry::{guarded, Dispatch, StageKind};
use super::Deferred;
use crate::error::{Error, Result};
use crate::runtime::{default_pool, WorkerPoolHandle};

/// Runs `f` on the default pool and returns its eventual result.
///
/// ```
/// let answer = deferred::supply_async(|| 6 * 7);
/// assert_eq!(answer.wait().unwrap(), 42);
/// ```
pub fn supply_async<T, F>(f: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    supply_async_on(&default_pool(), f)
}

/// Runs `f` on `pool` and returns its eventual result.
pub fn supply_async_on<T, F>(pool: &WorkerPoolHandle, f: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    produce(pool, move || Ok(f()))
}

/// Runs a fallible `f` on the default pool.
pub fn try_supply_async<T, E, F>(f: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    E: Into<Error>,
    F: FnOnce() -> core::result::Result<T, E> + Send + 'static,
{
    try_supply_async_on(&default_pool(), f)
}

/// Runs a fallible `f` on `pool`; `Err` fails the returned value.
pub fn try_supply_async_on<T, E, F>(pool: &WorkerPoolHandle, f: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    E: Into<Error>,
    F: FnOnce() -> core::result::Result<T, E> + Send + 'static,
{
    produce(pool, move || f().map_err(Into::into))
}

/// Runs `f` on the default pool for its side effects.
pub fn run_async<F>(f: F) -> Deferred<()>
where
    F: FnOnce() + Send + 'static,
{
    run_async_on(&default_pool(), f)
}

/// Runs `f` on `pool` for its side effects.
pub fn run_async_on<F>(pool: &WorkerPoolHandle, f: F) -> Deferred<()>
where
    F: FnOnce() + Send + 'static,
{
    produce(pool, move || {
        f();
        Ok(())
    })
}

fn produce<T, F>(pool: &WorkerPoolHandle, f: F) -> Deferred<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let target = Deferred::pending();
    let producer = target.clone();
    let rejected = target.clone();

    Dispatch::from(pool).execute(
        StageKind::Supply,
        move || {
            if producer.is_done() {
                tracing::trace!(deferred_id = producer.id(), "producer skipped, value already complete");
                return;
            }
            let outcome = guarded(f).and_then(|result| result);
            producer.settle(StageKind::Supply, outcome);
        },
        move |err| rejected.settle(StageKind::Supply, Err(err)),
    );
    target
}
