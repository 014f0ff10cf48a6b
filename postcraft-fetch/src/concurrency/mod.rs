//! Shared concurrency primitives for upstream calls.
//!
//! Every upstream call site composes the same small set of wrappers instead
//! of re-implementing deadline and retry logic:
//!
//! - [`with_timeout`] / [`until_cancelled`]: bound one operation by a
//!   deadline or a cancellation token.
//! - [`with_retry`]: retry transient failures with exponential backoff and jitter.
//! - [`execute_parallel`]: keyed fan-out with per-task isolation under one
//!   shared deadline.
//! - [`bounded_probe`]: concurrency-limited checks that stop launching once
//!   enough candidates have passed.

pub mod parallel;
pub mod probe;
pub mod retry;
pub mod timeout;

pub use parallel::execute_parallel;
pub use probe::bounded_probe;
pub use retry::{with_retry, RetryPolicy};
pub use timeout::{until_cancelled, with_timeout};
