//! Fixed-size worker pool for executing submitted work.
//!
//! Every asynchronous stage in this crate ultimately runs on a [`WorkerPool`]:
//! producers submit their computation here, and pooled continuations are
//! dispatched here when their upstream value completes.
//!
//! - **Fixed capacity**: `worker_threads` OS threads are spawned eagerly
//! - **Fairness**: FIFO ordering of submitted work
//! - **Cancellation**: soft cancellation of queued work through [`TaskHandle`]
//! - **Shutdown**: graceful (drain the queue) or immediate (discard the queue)
//!
//! # Lifecycle
//!
//! ```text
//! Running ──shutdown()──▶ Draining ──last worker exits──▶ Shutdown
//! ```
//!
//! Submissions are accepted only while `Running`. Once shutdown has begun,
//! [`WorkerPoolHandle::submit`] returns an [`ErrorKind::RejectedSubmission`]
//! error. Work discarded by an immediate shutdown has its rejection path run so
//! dependent values never stay pending.
//!
//! ## Panics in submitted work
//!
//! Work items run under `catch_unwind`; a panicking item is logged and the
//! worker keeps serving the queue.
//!
//! # Example
//!
//! ```
//! use deferred::runtime::{ShutdownMode, WorkerPool};
//! use std::time::Duration;
//!
//! let pool = WorkerPool::new(2);
//! let task = pool.handle().submit(|| println!("hello from a worker")).unwrap();
//! task.wait();
//! assert!(pool.shutdown_and_wait(ShutdownMode::Graceful, Duration::from_secs(1)));
//! ```
//!
//! [`ErrorKind::RejectedSubmission`]: crate::error::ErrorKind::RejectedSubmission

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::config::{ConfigError, PoolConfig};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::{Duration, Instant};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the pool owning the current thread, 0 for non-worker threads.
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

/// Lifecycle state of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Accepting and executing work.
    Running,
    /// Shutdown requested; queued work may still be executing.
    Draining,
    /// All workers have exited.
    Shutdown,
}

impl PoolState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Shutdown => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Shutdown,
        }
    }
}

/// How [`WorkerPool::shutdown`] treats work that is queued but not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownMode {
    /// Let workers finish everything already queued.
    Graceful,
    /// Discard queued work; only items already running complete.
    Immediate,
}

/// The owning handle of a worker pool.
///
/// Dropping it performs a graceful shutdown bounded by
/// [`PoolConfig::shutdown_timeout`]. Use [`WorkerPool::handle`] to share the
/// pool with producers and stages.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// A cloneable, non-owning handle used to submit work to a pool.
#[derive(Clone)]
pub struct WorkerPoolHandle {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Process-unique pool id.
    id: u64,
    /// Thread name prefix, also used to name the pool in errors.
    name: String,
    /// Configured number of workers.
    worker_threads: usize,
    /// Workers that have not yet exited.
    active_threads: AtomicUsize,
    /// Workers currently executing an item.
    busy_threads: AtomicUsize,
    /// Items queued but not yet picked up.
    pending_count: AtomicUsize,
    /// Next task id for tracking.
    next_task_id: AtomicU64,
    /// Work queue.
    queue: SegQueue<Job>,
    /// Encoded [`PoolState`].
    state: AtomicU8,
    /// Serializes submission, state transitions and parking.
    mutex: Mutex<()>,
    /// Wakes parked workers.
    work_available: Condvar,
    /// Signalled when the pool reaches [`PoolState::Shutdown`].
    terminated: Condvar,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    shutdown_timeout: Duration,
    /// Thread join handles for cleanup.
    thread_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

type Work = Box<dyn FnOnce() + Send + 'static>;
type Abandon = Box<dyn FnOnce(Error) + Send + 'static>;

/// A unit of work sitting in the queue.
struct Job {
    id: u64,
    work: Work,
    /// Invoked instead of `work` when the item is skipped or discarded.
    abandon: Option<Abandon>,
    cancelled: Arc<AtomicBool>,
    completion: Arc<TaskCompletion>,
}

/// Completion tracking for a submitted item.
struct TaskCompletion {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl TaskCompletion {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn signal_done(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.condvar.wait(&mut done);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut done = self.done.lock();
        while !*done {
            if self.condvar.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    fn is_done(&self) -> bool {
        *self.done.lock()
    }
}

/// Handle for a submitted work item.
///
/// Provides soft cancellation and completion waiting. Dropping the handle
/// does not affect the item.
pub struct TaskHandle {
    task_id: u64,
    cancelled: Arc<AtomicBool>,
    completion: Arc<TaskCompletion>,
}

impl TaskHandle {
    /// Returns the pool-local id of this item.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.task_id
    }

    /// Cancel this item.
    ///
    /// If the item is still queued it is skipped when dequeued. If it is
    /// already executing it runs to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if the item has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Check if the item has finished (run, skipped or discarded).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Block the calling thread until the item has finished.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Wait for the item with a timeout.
    ///
    /// Returns `true` if the item finished, `false` if the timeout elapsed.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a pool with `worker_threads` workers and default options.
    ///
    /// # Panics
    ///
    /// Panics if `worker_threads` is 0 or a worker thread cannot be spawned.
    /// Use [`WorkerPoolBuilder`](super::WorkerPoolBuilder) to handle those
    /// cases as errors.
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        let config = PoolConfig {
            worker_threads,
            ..PoolConfig::default()
        };
        match Self::with_config(config) {
            Ok(pool) => pool,
            Err(e) => panic!("failed to start worker pool: {e}"),
        }
    }

    /// Creates a pool from a full configuration.
    pub fn with_config(mut config: PoolConfig) -> std::result::Result<Self, ConfigError> {
        config.normalize();
        config.validate()?;

        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: config.thread_name_prefix,
            worker_threads: config.worker_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            next_task_id: AtomicU64::new(1),
            queue: SegQueue::new(),
            state: AtomicU8::new(PoolState::Running.as_u8()),
            mutex: Mutex::new(()),
            work_available: Condvar::new(),
            terminated: Condvar::new(),
            on_thread_start: config.on_thread_start,
            on_thread_stop: config.on_thread_stop,
            shutdown_timeout: config.shutdown_timeout,
            thread_handles: Mutex::new(Vec::with_capacity(config.worker_threads)),
        });

        for index in 0..inner.worker_threads {
            if let Err(e) = spawn_worker(&inner, index) {
                shutdown_inner(&inner, ShutdownMode::Immediate);
                return Err(e);
            }
        }

        tracing::debug!(
            pool = %inner.name,
            pool_id = inner.id,
            workers = inner.worker_threads,
            "worker pool started"
        );
        Ok(Self { inner })
    }

    /// Returns a cloneable handle to this pool.
    #[must_use]
    pub fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Submits a work item; shorthand for `self.handle().submit(work)`.
    pub fn submit<F>(&self, work: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        submit_job(&self.inner, Box::new(work), None)
    }

    /// Stops accepting new work.
    ///
    /// In [`ShutdownMode::Graceful`] queued items still run. In
    /// [`ShutdownMode::Immediate`] queued items are discarded. Returns the
    /// number of discarded items. Does not wait for workers to exit; see
    /// [`WorkerPool::await_termination`].
    pub fn shutdown(&self, mode: ShutdownMode) -> usize {
        shutdown_inner(&self.inner, mode)
    }

    /// Blocks until the pool reaches [`PoolState::Shutdown`] or the timeout elapses.
    ///
    /// Returns `true` if the pool terminated. Called from one of the pool's
    /// own workers it returns `false` immediately, since that worker cannot
    /// exit while it waits.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        await_termination_inner(&self.inner, timeout)
    }

    /// Shuts down and waits for all workers to exit.
    ///
    /// Returns `true` if all workers exited within `timeout`.
    pub fn shutdown_and_wait(&self, mode: ShutdownMode, timeout: Duration) -> bool {
        self.shutdown(mode);
        if !self.await_termination(timeout) {
            return false;
        }
        let handles: Vec<_> = self.inner.thread_handles.lock().drain(..).collect();
        for handle in handles {
            // Workers have already left their loop, so join returns promptly.
            let _ = handle.join();
        }
        true
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state() != PoolState::Running
    }

    /// Returns the number of queued items not yet picked up.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns the configured number of workers.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.inner.worker_threads
    }

    /// Returns the number of workers that have not exited.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns the number of workers currently executing an item.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state())
            .field("worker_threads", &self.inner.worker_threads)
            .field("active_threads", &self.active_threads())
            .field("pending_tasks", &self.pending_count())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let timeout = self.inner.shutdown_timeout;
        if !self.shutdown_and_wait(ShutdownMode::Graceful, timeout) {
            tracing::warn!(
                pool = %self.inner.name,
                timeout_ms = timeout.as_millis(),
                "worker pool did not terminate before drop timeout"
            );
        }
    }
}

impl WorkerPoolHandle {
    /// Submits a work item.
    ///
    /// Returns immediately after queuing. Fails with
    /// [`ErrorKind::RejectedSubmission`] once shutdown has begun.
    pub fn submit<F>(&self, work: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        submit_job(&self.inner, Box::new(work), None)
    }

    /// Submits a work item with a rejection path.
    ///
    /// `abandon` runs instead of `work` if the item is cancelled before it
    /// starts or discarded by an immediate shutdown. It is never run when
    /// submission itself fails; the caller receives that error directly.
    pub(crate) fn submit_with_abandon(&self, work: Work, abandon: Abandon) -> Result<TaskHandle> {
        submit_job(&self.inner, work, Some(abandon))
    }

    /// Returns the pool name (its thread name prefix).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state() != PoolState::Running
    }

    /// Returns the number of queued items not yet picked up.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns the number of workers that have not exited.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` if the calling thread is one of this pool's workers.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.with(Cell::get) == self.inner.id
    }

    /// Returns `true` if both handles refer to the same pool.
    #[must_use]
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state())
            .field("pending_tasks", &self.pending_count())
            .finish()
    }
}

impl PoolInner {
    fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PoolState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn rejected(&self) -> Error {
        Error::rejected(&self.name)
    }
}

fn submit_job(inner: &Arc<PoolInner>, work: Work, abandon: Option<Abandon>) -> Result<TaskHandle> {
    let task_id = inner.next_task_id.fetch_add(1, Ordering::Relaxed);
    let cancelled = Arc::new(AtomicBool::new(false));
    let completion = Arc::new(TaskCompletion::new());

    {
        // Holding the lock across the state check and the push keeps a
        // concurrent shutdown from stranding the item in the queue.
        let _guard = inner.mutex.lock();
        if inner.state() != PoolState::Running {
            tracing::trace!(pool = %inner.name, task_id, "submission rejected");
            return Err(inner.rejected());
        }
        inner.queue.push(Job {
            id: task_id,
            work,
            abandon,
            cancelled: Arc::clone(&cancelled),
            completion: Arc::clone(&completion),
        });
        inner.pending_count.fetch_add(1, Ordering::Relaxed);
        inner.work_available.notify_one();
    }

    tracing::trace!(pool = %inner.name, task_id, "work submitted");
    Ok(TaskHandle {
        task_id,
        cancelled,
        completion,
    })
}

fn shutdown_inner(inner: &PoolInner, mode: ShutdownMode) -> usize {
    let discarded = {
        let _guard = inner.mutex.lock();
        if inner.state() == PoolState::Running {
            inner.set_state(PoolState::Draining);
        }
        let mut discarded = Vec::new();
        if mode == ShutdownMode::Immediate {
            while let Some(job) = inner.queue.pop() {
                inner.pending_count.fetch_sub(1, Ordering::Relaxed);
                discarded.push(job);
            }
        }
        inner.work_available.notify_all();
        discarded
    };

    let count = discarded.len();
    for job in discarded {
        if let Some(abandon) = job.abandon {
            abandon(Error::new(ErrorKind::RejectedSubmission).with_message(format!(
                "pool {} discarded queued work during immediate shutdown",
                inner.name
            )));
        }
        job.completion.signal_done();
    }

    tracing::debug!(
        pool = %inner.name,
        mode = ?mode,
        discarded = count,
        "worker pool shutdown requested"
    );
    count
}

fn await_termination_inner(inner: &PoolInner, timeout: Duration) -> bool {
    if CURRENT_POOL.with(Cell::get) == inner.id {
        tracing::warn!(pool = %inner.name, "await_termination called from a pool worker");
        return false;
    }
    let deadline = Instant::now().checked_add(timeout);
    let mut guard = inner.mutex.lock();
    while inner.state() != PoolState::Shutdown {
        let Some(deadline) = deadline else {
            inner.terminated.wait(&mut guard);
            continue;
        };
        if inner.terminated.wait_until(&mut guard, deadline).timed_out() {
            return inner.state() == PoolState::Shutdown;
        }
    }
    true
}

/// Spawn one worker thread on the given pool.
fn spawn_worker(inner: &Arc<PoolInner>, index: usize) -> std::result::Result<(), ConfigError> {
    let worker_inner = Arc::clone(inner);
    let name = format!("{}-worker-{}", inner.name, index);
    inner.active_threads.fetch_add(1, Ordering::Relaxed);

    let spawned = thread::Builder::new().name(name).spawn(move || {
        CURRENT_POOL.with(|current| current.set(worker_inner.id));
        if let Some(ref callback) = worker_inner.on_thread_start {
            callback();
        }

        worker_loop(&worker_inner);

        if let Some(ref callback) = worker_inner.on_thread_stop {
            callback();
        }
        worker_exited(&worker_inner);
    });

    match spawned {
        Ok(handle) => {
            inner.thread_handles.lock().push(handle);
            Ok(())
        }
        Err(e) => {
            inner.active_threads.fetch_sub(1, Ordering::Relaxed);
            Err(ConfigError::Spawn {
                reason: e.to_string(),
            })
        }
    }
}

fn worker_exited(inner: &PoolInner) {
    let _guard = inner.mutex.lock();
    if inner.active_threads.fetch_sub(1, Ordering::AcqRel) == 1 {
        inner.set_state(PoolState::Shutdown);
        inner.terminated.notify_all();
        tracing::debug!(pool = %inner.name, "worker pool terminated");
    }
}

/// The worker loop for pool threads.
fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            run_job(inner, job);
            continue;
        }

        let mut guard = inner.mutex.lock();
        if !inner.queue.is_empty() {
            continue;
        }
        if inner.state() != PoolState::Running {
            break;
        }
        inner.work_available.wait(&mut guard);
    }
}

fn run_job(inner: &PoolInner, job: Job) {
    if job.cancelled.load(Ordering::Acquire) {
        tracing::trace!(pool = %inner.name, task_id = job.id, "skipping cancelled work");
        if let Some(abandon) = job.abandon {
            abandon(Error::cancelled());
        }
        job.completion.signal_done();
        return;
    }

    inner.busy_threads.fetch_add(1, Ordering::Relaxed);
    let outcome = panic::catch_unwind(AssertUnwindSafe(job.work));
    inner.busy_threads.fetch_sub(1, Ordering::Relaxed);

    if let Err(payload) = outcome {
        tracing::warn!(
            pool = %inner.name,
            task_id = job.id,
            error = %Error::panicked(payload.as_ref()),
            "submitted work panicked"
        );
    }
    job.completion.signal_done();
}
