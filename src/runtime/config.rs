//! Worker pool configuration types.
//!
//! These types hold the concrete values that drive pool behavior. In most
//! cases you should use [`WorkerPoolBuilder`](super::builder::WorkerPoolBuilder)
//! rather than creating a [`PoolConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism minus one (at least 1) |
//! | `thread_name_prefix` | `"deferred"` |
//! | `shutdown_timeout` | 5 s |
//! | `on_thread_start` / `on_thread_stop` | `None` |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default name prefix for worker threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "deferred";

/// Default bound on how long dropping a pool waits for its workers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced while assembling a pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A field value failed validation.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {reason}, got {value:?}")]
    InvalidEnv {
        /// The environment variable name.
        var: &'static str,
        /// The raw value found in the environment.
        value: String,
        /// Why the value is invalid.
        reason: String,
    },
    /// A configuration file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying I/O failure.
        reason: String,
    },
    /// A configuration file could not be parsed.
    #[error("failed to parse config: {reason}")]
    Parse {
        /// The parser failure.
        reason: String,
    },
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {reason}")]
    Spawn {
        /// The underlying I/O failure.
        reason: String,
    },
}

/// Worker pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Name prefix for worker threads; threads are named `{prefix}-worker-{n}`.
    pub thread_name_prefix: String,
    /// How long dropping the owning pool waits for a graceful drain.
    pub shutdown_timeout: Duration,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl PoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_threads",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "thread_name_prefix",
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .saturating_sub(1)
            .max(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}
