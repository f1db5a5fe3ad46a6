//! Combinators for chaining and composing deferred values.
//!
//! Most combinators are methods on [`Deferred`](crate::Deferred); the N-way
//! ones are free functions:
//!
//! - [`stage`]: `map`, `try_map`, `consume`, `run`, `flat_map`
//! - [`join`]: `combine`, `combine_consume`, `run_after_both`
//! - [`all`]: [`all_of`], [`join_all`]
//! - [`race`]: `either`, `either_consume`, `either_run`, [`any_of`]
//! - [`recover`]: `handle`, `exceptionally`, `when_complete`
//!
//! Every method comes in three forms: the plain one runs its function on
//! the completing thread, `_with` takes a [`Dispatch`](crate::Dispatch), and
//! `_async` uses the default pool.

pub mod all;
pub mod join;
pub mod race;
pub mod recover;
pub mod stage;

pub use all::{all_of, join_all};
pub use race::any_of;
