//! Worker pool builder.

use crate::runtime::config::{ConfigError, PoolConfig};
use crate::runtime::env_config;
use crate::runtime::pool::WorkerPool;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing a [`WorkerPool`] with custom configuration.
///
/// Each method consumes `self` and returns the updated builder. Values set
/// here take precedence over environment variables and config files that
/// were loaded by [`WorkerPoolBuilder::from_env`] or
/// [`WorkerPoolBuilder::from_toml_file`], as long as the setter is called
/// after the loader.
///
/// ```
/// use deferred::runtime::WorkerPoolBuilder;
/// use std::time::Duration;
///
/// let pool = WorkerPoolBuilder::new()
///     .worker_threads(2)
///     .thread_name_prefix("pricing")
///     .shutdown_timeout(Duration::from_secs(1))
///     .build()
///     .unwrap();
/// assert_eq!(pool.worker_threads(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct WorkerPoolBuilder {
    config: PoolConfig,
}

impl WorkerPoolBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Create a builder seeded from `DEFERRED_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = PoolConfig::default();
        env_config::apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    /// Create a builder from a TOML file, then apply environment overrides.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let toml = env_config::parse_toml_file(path.as_ref())?;
        let mut config = PoolConfig::default();
        env_config::apply_toml_config(&mut config, &toml);
        env_config::apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set how long dropping the pool waits for a graceful drain.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Returns the configuration assembled so far.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build the pool, spawning its workers.
    pub fn build(self) -> Result<WorkerPool, ConfigError> {
        WorkerPool::with_config(self.config)
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
