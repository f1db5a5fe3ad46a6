//! The process-wide default worker pool.
//!
//! Producers and `_async` stages that are not given an explicit pool run on
//! this one. It is created lazily on first use from `DEFERRED_*` environment
//! variables; an invalid environment falls back to defaults with a warning.
//! The pool is never dropped, so its workers live until the process exits.

use crate::runtime::builder::WorkerPoolBuilder;
use crate::runtime::config::PoolConfig;
use crate::runtime::pool::{WorkerPool, WorkerPoolHandle};
use std::sync::OnceLock;

static DEFAULT_POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Returns a handle to the process-wide default pool, creating it if needed.
///
/// # Panics
///
/// Panics if no worker thread can be spawned even with the default
/// configuration.
#[must_use]
pub fn default_pool() -> WorkerPoolHandle {
    DEFAULT_POOL.get_or_init(init_default_pool).handle()
}

fn init_default_pool() -> WorkerPool {
    let built = WorkerPoolBuilder::from_env().and_then(WorkerPoolBuilder::build);
    match built {
        Ok(pool) => {
            tracing::debug!(workers = pool.worker_threads(), "default worker pool initialized");
            pool
        }
        Err(e) => {
            tracing::warn!(error = %e, "invalid default pool configuration, using defaults");
            WorkerPool::with_config(PoolConfig::default())
                .unwrap_or_else(|e| panic!("failed to start default worker pool: {e}"))
        }
    }
}
