//! Resilience Module
//!
//! Retry, backoff, pacing and cancellation for calls to rate-limited
//! external services.

pub mod backoff;
pub mod cancel;
pub mod error;
pub mod executor;

pub use backoff::{BackoffPolicy, BackoffSettings, PolicyError};
pub use cancel::{CallContext, CancelHandle, Interrupt};
pub use error::{ExecutorError, FailureKind};
pub use executor::{CallOutcome, Executed, QuotaHint, RequestExecutor};
