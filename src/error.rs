//! Error types and error handling strategy for deferred values.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Errors are `Clone`: a failed value hands the same error to every
//!   dependent stage
//! - Panics in user work are caught and converted to [`ErrorKind::Panicked`]
//! - Intermediate stages never throw outward; failure is encoded into the
//!   downstream value and surfaces only at a wait boundary or inside a
//!   recovery stage
//!
//! # Error Categories
//!
//! - **Computation**: user-supplied work returned an error or panicked
//! - **Composition**: an upstream failure carried through a short-circuiting stage
//! - **Timeout**: a bounded wait gave up
//! - **Pool**: a worker pool refused work
//! - **Cancellation**: the value was cancelled before it completed
//! - **Internal**: engine invariant violations (double completion)
//!
//! # Composition wrapping
//!
//! When `map`, `flat_map`, `combine` and friends skip their transform because
//! an upstream failed, the downstream fails with an [`ErrorKind::Composition`]
//! error whose source is the upstream error. Composition errors are never
//! wrapped twice, so [`Error::root_cause`] is at most one hop away.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Computation ===
    /// User-supplied work returned an error.
    Computation,
    /// User-supplied work panicked.
    Panicked,

    // === Composition ===
    /// An upstream failure propagated through a short-circuiting stage.
    Composition,

    // === Waiting ===
    /// A bounded wait elapsed before the value completed.
    Timeout,

    // === Pools ===
    /// The pool has begun or completed shutdown.
    RejectedSubmission,

    // === Cancellation ===
    /// The value was cancelled while still pending.
    Cancelled,

    // === Internal ===
    /// A terminal write was attempted on an already-completed value.
    DoubleCompletion,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Computation | Self::Panicked => ErrorCategory::Computation,
            Self::Composition => ErrorCategory::Composition,
            Self::Timeout => ErrorCategory::Timeout,
            Self::RejectedSubmission => ErrorCategory::Pool,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::DoubleCompletion => ErrorCategory::Internal,
        }
    }

    /// Returns true if this kind signals an engine defect rather than a user error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Failures raised by user work.
    Computation,
    /// Upstream failures carried downstream.
    Composition,
    /// Bounded waits that gave up.
    Timeout,
    /// Worker pool admission failures.
    Pool,
    /// Cancellation of a pending value.
    Cancellation,
    /// Engine invariant violations.
    Internal,
}

/// The main error type for deferred-value operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates a computation error with a message.
    #[must_use]
    pub fn computation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Computation).with_message(detail)
    }

    /// Wraps an arbitrary error raised by user work.
    #[must_use]
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::Computation)
            .with_message(message)
            .with_source(source)
    }

    /// Converts a caught panic payload into an error.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Wraps an upstream failure for a stage that skipped its transform.
    ///
    /// Composition errors pass through unchanged.
    #[must_use]
    pub fn composition(cause: Self) -> Self {
        if cause.kind == ErrorKind::Composition {
            return cause;
        }
        let message = cause.to_string();
        Self::new(ErrorKind::Composition)
            .with_message(message)
            .with_source(cause)
    }

    /// Creates a timeout error for a bounded wait.
    #[must_use]
    pub fn timeout(waited: std::time::Duration) -> Self {
        Self::new(ErrorKind::Timeout)
            .with_message(format!("value not completed within {waited:?}"))
    }

    /// Creates a rejected-submission error for the named pool.
    #[must_use]
    pub fn rejected(pool: &str) -> Self {
        Self::new(ErrorKind::RejectedSubmission)
            .with_message(format!("pool {pool} is not accepting work"))
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled).with_message("value cancelled before completion")
    }

    /// Creates a double-completion error for the given value id.
    #[must_use]
    pub fn double_completion(id: u64) -> Self {
        Self::new(ErrorKind::DoubleCompletion)
            .with_message(format!("deferred #{id} already completed"))
    }

    /// Returns the upstream error if this is a composition error.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        if self.kind != ErrorKind::Composition {
            return None;
        }
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<Self>())
    }

    /// Returns the error that originally failed, looking through composition wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a bounded-wait timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns true if this error came from a pool refusing work.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.kind, ErrorKind::RejectedSubmission)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::from_source(e)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for deferred-value operations.
pub type Result<T> = core::result::Result<T, Error>;
