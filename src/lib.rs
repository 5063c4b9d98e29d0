//! Ops Agency
//!
//! Resilient calls to rate-limited services, with:
//! - Retry with exponential backoff, pacing, deadlines and cancellation
//! - Live per-service quota and error health
//! - Append-only JSONL audit trail
//! - Failure-pattern learning over the audit trail

pub mod config;
pub mod health;
pub mod learning;
pub mod orchestrator;
pub mod resilience;
pub mod storage;
pub mod utils;

// Re-exports for convenience
pub use config::AgencyConfig;
pub use health::{HealthMonitor, HealthReport, HealthStatus};
pub use learning::{LearningAnalyzer, LearningReport, Recommendation};
pub use orchestrator::{ActionRequest, AgencyError, Orchestrator};
pub use resilience::{BackoffPolicy, CallContext, CallOutcome, CancelHandle, ExecutorError, RequestExecutor};
pub use storage::{AuditEntry, AuditStore, JsonlAuditStore};
