//! Deferred values: the eventual success or failure of an operation, with
//! chainable continuations.
//!
//! Every [`Deferred`] lives on the thread-local event loop in [`runtime`].
//! Settling one never takes effect inside the caller's stack frame; the
//! effect is queued as a microtask and observed once the loop is driven.
//!
//! # Examples
//!
//! ```
//! use deferred_value::{runtime, Deferred};
//!
//! let doubled = Deferred::<i32, String>::resolve(21).map(|v| v * 2);
//! assert_eq!(runtime::block_on(doubled).unwrap(), Ok(42));
//! ```
use thiserror::Error;

pub mod combinators;
pub mod config;
pub mod deferred;
pub mod report;
pub mod runtime;
pub mod waiter;

pub use combinators::{all, all_settled, any, race, AggregateError, Settled};
pub use config::{Config, UnhandledRejections};
pub use deferred::{Deferred, IntoOutcome, Outcome, Resolver, Status};
pub use report::{Disposition, LogReporter, Reporter, UnhandledRejection};
pub use waiter::Waiter;

#[derive(Debug, Error)]
pub enum Error {
    /// A rejection settled with no rejection handler and the reporter
    /// declared it fatal.
    #[error("uncaught in deferred value #{id}: {reason}")]
    UncaughtRejection { id: u64, reason: String },
    #[error("event loop ran out of work before the future completed")]
    Stalled,
    #[error("unknown unhandled-rejection policy {0:?}")]
    InvalidPolicy(String),
}
