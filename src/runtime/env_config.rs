//! Environment variable and config file support for [`WorkerPoolBuilder`](super::builder::WorkerPoolBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `DEFERRED_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `DEFERRED_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `DEFERRED_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `DEFERRED_SHUTDOWN_TIMEOUT_MS` | `u64` | `shutdown_timeout` |

use crate::runtime::config::{ConfigError, PoolConfig};
use std::time::Duration;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "DEFERRED_WORKER_THREADS";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "DEFERRED_THREAD_NAME_PREFIX";
/// Environment variable name for the drop-time shutdown bound, in milliseconds.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "DEFERRED_SHUTDOWN_TIMEOUT_MS";

/// Apply environment variable overrides to a [`PoolConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut PoolConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_SHUTDOWN_TIMEOUT_MS) {
        config.shutdown_timeout =
            Duration::from_millis(parse_u64(ENV_SHUTDOWN_TIMEOUT_MS, &val)?);
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            value: val.to_string(),
            reason: format!("expected unsigned integer ({e})"),
        })
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            value: val.to_string(),
            reason: format!("expected u64 ({e})"),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable pool configuration.
///
/// ```toml
/// [pool]
/// worker_threads = 4
/// thread_name_prefix = "pricing"
/// shutdown_timeout_ms = 2000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolTomlConfig {
    /// Pool settings.
    #[serde(default)]
    pub pool: PoolToml,
}

/// Pool section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
    /// Drop-time shutdown bound in milliseconds.
    pub shutdown_timeout_ms: Option<u64>,
}

/// Apply a parsed TOML config to a [`PoolConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut PoolConfig, toml: &PoolTomlConfig) {
    if let Some(v) = toml.pool.worker_threads {
        config.worker_threads = v;
    }
    if let Some(ref v) = toml.pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.pool.shutdown_timeout_ms {
        config.shutdown_timeout = Duration::from_millis(v);
    }
}

/// Parse a TOML string into a [`PoolTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<PoolTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })
}

/// Read and parse a TOML file into a [`PoolTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<PoolTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
