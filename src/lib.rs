//! Deferred: composable single-assignment values computed on worker pools.
//!
//! # Overview
//!
//! A [`Deferred<T>`] is a value that becomes available later. It is written
//! exactly once, fulfilled or failed, and any number of stages can be
//! chained on it before or after that happens. Stages return new deferred
//! values immediately; only the explicit wait operations block.
//!
//! # Core Guarantees
//!
//! - **Single completion**: the first terminal write wins; later writes are rejected
//! - **Exactly-once continuations**: every registered stage fires once, in registration order
//! - **Short-circuiting**: an upstream failure skips transforms and reaches the downstream as a composition error
//! - **No lost stages**: a pool that refuses work fails the dependent value instead of leaving it pending
//! - **No user code under locks**: continuations may register further stages on the value that fired them
//!
//! # Module Structure
//!
//! - [`deferred`]: the [`Deferred`] cell, its continuation registry and producers
//! - [`combinator`]: map/flat_map stages, join, barrier, race and recovery
//! - [`runtime`]: worker pools, their configuration and the default pool
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use deferred::{supply_async, Deferred};
//!
//! let price = supply_async(|| 5199_i64);
//! let discount = supply_async(|| 200_i64);
//! let real = price.combine(&discount, |p, d| p - d);
//!
//! let label = real
//!     .map(|p| format!("{p}"))
//!     .exceptionally(|_| "UnKnown".to_string());
//! assert_eq!(label.wait().unwrap(), "4999");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod combinator;
pub mod deferred;
pub mod error;
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_utils;

pub use combinator::{all_of, any_of, join_all};
pub use deferred::{
    run_async, run_async_on, supply_async, supply_async_on, try_supply_async,
    try_supply_async_on, Deferred, Dispatch, StageKind,
};
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use runtime::{
    default_pool, ConfigError, PoolConfig, PoolState, ShutdownMode, TaskHandle, WorkerPool,
    WorkerPoolBuilder, WorkerPoolHandle,
};
