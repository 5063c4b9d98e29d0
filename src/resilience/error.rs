//! Failure taxonomy for external service calls.

use thiserror::Error;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Errors produced by an operation or by the executor driving it.
///
/// Operations pick the variant; the executor only reads [`ExecutorError::kind`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("rate limit hit: {0}")]
    RateLimited(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limit exceeded after {attempts} attempts: {last_error}")]
    RateLimitExceeded { attempts: u32, last_error: String },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },
}

impl ExecutorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutorError::RateLimited(_)
            | ExecutorError::Timeout(_)
            | ExecutorError::Connection(_) => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Raised by the caller's context rather than by the service.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ExecutorError::Cancelled { .. } | ExecutorError::DeadlineExceeded { .. })
    }

    /// Attempts made, for errors raised by the executor itself.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ExecutorError::RateLimitExceeded { attempts, .. }
            | ExecutorError::ExhaustedRetries { attempts, .. }
            | ExecutorError::Cancelled { attempts }
            | ExecutorError::DeadlineExceeded { attempts } => Some(*attempts),
            _ => None,
        }
    }

    /// Build the error returned once the retry budget is spent.
    pub(crate) fn escalate(last: ExecutorError, attempts: u32) -> Self {
        let last_error = last.to_string();
        match last {
            ExecutorError::RateLimited(_) => ExecutorError::RateLimitExceeded { attempts, last_error },
            _ => ExecutorError::ExhaustedRetries { attempts, last_error },
        }
    }
}
