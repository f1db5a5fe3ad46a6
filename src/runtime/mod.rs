//! Worker pools that execute deferred work.
//!
//! - [`config`]: pool configuration types
//! - [`env_config`]: environment variable and config file overrides
//! - [`builder`]: move-based pool builder
//! - [`pool`]: the fixed-size worker pool and its handles
//! - [`default_pool`]: the lazily created process-wide pool
//!
//! # Quick Start
//!
//! ```
//! use deferred::runtime::{ShutdownMode, WorkerPoolBuilder};
//! use std::time::Duration;
//!
//! let pool = WorkerPoolBuilder::new().worker_threads(2).build().unwrap();
//! let task = pool.handle().submit(|| {}).unwrap();
//! task.wait();
//! pool.shutdown_and_wait(ShutdownMode::Graceful, Duration::from_secs(1));
//! ```
//!
//! # Configuration Precedence
//!
//! 1. Builder setters
//! 2. `DEFERRED_*` environment variables
//! 3. TOML config file (`config-file` feature)
//! 4. [`PoolConfig::default`]

pub mod builder;
pub mod config;
pub mod default_pool;
pub mod env_config;
pub mod pool;

pub use builder::WorkerPoolBuilder;
pub use config::{ConfigError, PoolConfig};
pub use default_pool::default_pool;
pub use pool::{PoolState, ShutdownMode, TaskHandle, WorkerPool, WorkerPoolHandle};
