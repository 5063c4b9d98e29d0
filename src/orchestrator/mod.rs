//! Orchestrator Module
//!
//! Composition root: runs named operations through the per-service executor,
//! feeds the outcome to the health monitor, and records it in the audit trail.

pub mod session;

pub use session::{AgentState, StateManager};

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AgencyConfig;
use crate::health::{HealthMonitor, HealthReport, HealthStatus};
use crate::learning::{suggest_fix, LearningAnalyzer, LearningReport};
use crate::resilience::{CallContext, CallOutcome, ExecutorError, RequestExecutor};
use crate::storage::{AuditEntry, AuditStore, JsonlAuditStore, StorageError};
use crate::utils::truncate_middle;

/// Error strings longer than this are cut in the middle before they are stored.
const MAX_ERROR_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum AgencyError {
    /// The operation failed; the failure was recorded.
    #[error(transparent)]
    Operation(#[from] ExecutorError),

    /// The outcome could not be recorded. `operation` holds the operation's
    /// own error when it had failed too.
    #[error("failed to record outcome of {action}: {source}")]
    Audit {
        action: String,
        #[source]
        source: StorageError,
        operation: Option<ExecutorError>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AgencyError {
    /// The operation's failure, if there was one.
    pub fn operation_error(&self) -> Option<&ExecutorError> {
        match self {
            AgencyError::Operation(err) => Some(err),
            AgencyError::Audit { operation, .. } => operation.as_ref(),
            AgencyError::Storage(_) => None,
        }
    }
}

/// One named operation against one service.
#[derive(Debug, Clone, Default)]
pub struct ActionRequest {
    pub service: String,
    pub action: String,
    /// Copied into the audit entry.
    pub details: Map<String, Value>,
    pub context: CallContext,
}

impl ActionRequest {
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

pub struct Orchestrator {
    executors: HashMap<String, RequestExecutor>,
    default_executor: RequestExecutor,
    health: Arc<HealthMonitor>,
    audit: Arc<dyn AuditStore>,
    learning: LearningAnalyzer,
    state: StateManager,
}

impl Orchestrator {
    /// Wire everything from `config`, with the JSONL audit log it names.
    pub fn from_config(config: &AgencyConfig) -> Self {
        let audit = Arc::new(JsonlAuditStore::new(
            config.storage.audit_log_path.clone(),
            config.storage.max_audit_entries,
        ));
        Self::with_store(config, audit)
    }

    /// Same as [`Orchestrator::from_config`] but recording into `audit`.
    pub fn with_store(config: &AgencyConfig, audit: Arc<dyn AuditStore>) -> Self {
        let executors = config
            .services
            .iter()
            .map(|(name, settings)| {
                let mut executor = RequestExecutor::new(settings.backoff.clone());
                if let Some(pace) = settings.requests_per_minute.and_then(NonZeroU32::new) {
                    executor = executor.with_rate_limit(pace);
                }
                (name.clone(), executor)
            })
            .collect();

        let health = HealthMonitor::with_low_quota_ratio(config.health.low_quota_ratio)
            .with_services(config.services.keys());

        Self {
            executors,
            default_executor: RequestExecutor::new(config.default_backoff.clone()),
            health: Arc::new(health),
            learning: LearningAnalyzer::with_confidence_saturation(
                audit.clone(),
                config.learning.confidence_saturation,
            ),
            audit,
            state: StateManager::new(config.storage.state_file_path.clone()),
        }
    }

    /// Replace the executor used for `service`.
    pub fn with_executor(mut self, service: impl Into<String>, executor: RequestExecutor) -> Self {
        self.executors.insert(service.into(), executor);
        self
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    fn executor_for(&self, service: &str) -> &RequestExecutor {
        self.executors.get(service).unwrap_or(&self.default_executor)
    }

    /// Run `operation` as `action` against `service` with no deadline.
    pub async fn execute<T, F, Fut>(&self, service: &str, action: &str, operation: F) -> Result<T, AgencyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CallOutcome<T>, ExecutorError>>,
    {
        self.execute_with(ActionRequest::new(service, action), operation).await
    }

    /// Run one request to completion and record how it ended.
    ///
    /// The caller sees the operation's value, or its final error once that
    /// error is in the audit trail. A failed append is reported even when the
    /// operation itself succeeded.
    pub async fn execute_with<T, F, Fut>(&self, request: ActionRequest, operation: F) -> Result<T, AgencyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CallOutcome<T>, ExecutorError>>,
    {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "execute",
            service = %request.service,
            action = %request.action,
            %correlation_id
        );

        async move {
            let ActionRequest { service, action, mut details, context } = request;
            details.insert("service".into(), json!(service));
            details.insert("correlation_id".into(), json!(correlation_id.to_string()));

            match self.executor_for(&service).execute(&context, operation).await {
                Ok(executed) => {
                    if let Some(quota) = executed.quota {
                        self.health.update_quota(&service, quota.remaining, quota.limit).await;
                        details.insert("quota".into(), json!(quota));
                    }
                    let delays_ms: Vec<u64> = executed.delays.iter().map(|d| d.as_millis() as u64).collect();
                    details.insert("attempts".into(), json!(executed.attempts));
                    details.insert("delays_ms".into(), json!(delays_ms));

                    let entry = AuditEntry::success(action.as_str(), details);
                    if let Err(source) = self.audit.append(&entry).await {
                        warn!(error = %source, "success could not be recorded");
                        return Err(AgencyError::Audit { action, source, operation: None });
                    }

                    info!(attempts = executed.attempts, "action succeeded");
                    Ok(executed.value)
                }
                Err(err) => {
                    let message = truncate_middle(&err.to_string(), MAX_ERROR_BYTES);
                    // An interrupt says nothing about the service.
                    if !err.is_interrupt() {
                        self.health.record_error(&service, &message).await;
                    }

                    let suggestion = suggest_fix(&message);
                    details.insert("kind".into(), json!(format!("{:?}", err.kind()).to_lowercase()));
                    if let Some(attempts) = err.attempts() {
                        details.insert("attempts".into(), json!(attempts));
                    }

                    warn!(error = %message, suggestion, "action failed");
                    let entry = AuditEntry::failure(action.as_str(), message, Some(suggestion.to_string()), details);
                    if let Err(source) = self.audit.append(&entry).await {
                        warn!(error = %source, "failure could not be recorded");
                        return Err(AgencyError::Audit { action, source, operation: Some(err) });
                    }

                    Err(AgencyError::Operation(err))
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn check_health(&self) -> HealthReport {
        self.health.check_health().await
    }

    pub async fn health_status(&self) -> HealthStatus {
        self.health.status().await
    }

    pub async fn is_healthy(&self) -> bool {
        self.health.status().await == HealthStatus::Healthy
    }

    /// False while any service is unhealthy.
    pub async fn should_accept_work(&self) -> bool {
        self.health.status().await != HealthStatus::Unhealthy
    }

    pub async fn clear_errors(&self) {
        self.health.clear_errors().await
    }

    pub async fn update_quota(&self, service: &str, remaining: Option<u64>, limit: Option<u64>) {
        self.health.update_quota(service, remaining, limit).await
    }

    pub async fn get_learning_report(&self) -> Result<LearningReport, AgencyError> {
        Ok(self.learning.generate_report().await?)
    }

    /// Digest of the top five recommendations.
    pub async fn get_improvement_summary(&self) -> Result<String, AgencyError> {
        Ok(self.learning.get_improvement_summary().await?)
    }

    /// Keep the newest `keep` audit entries (the store's cap when `None`).
    pub async fn truncate_audit(&self, keep: Option<usize>) -> Result<usize, AgencyError> {
        Ok(self.audit.truncate(keep).await?)
    }

    /// Fold a fresh health check into the persisted agent state.
    pub async fn save_state(&self) -> Result<AgentState, AgencyError> {
        let report = self.health.check_health().await;
        let state = self.state.update(|s| s.apply_report(&report)).await?;
        info!(healthy = state.is_healthy, "agent state saved");
        Ok(state)
    }

    pub async fn load_state(&self) -> Result<AgentState, AgencyError> {
        Ok(self.state.load().await?)
    }

    /// Persist `issue` as handled; false if it already was.
    pub async fn mark_processed(&self, issue: &str) -> Result<bool, AgencyError> {
        let mut added = false;
        self.state.update(|s| added = s.mark_processed(issue)).await?;
        Ok(added)
    }
}
