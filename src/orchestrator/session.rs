//! Agent State Manager - persists the health snapshot between runs
//!
//! The state file is a single pretty-printed JSON document, rewritten whole on
//! every save so collaborators can inspect it by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::health::HealthReport;
use crate::storage::StorageError;

/// Default file that stores the agent state
const STATE_FILENAME: &str = "agent_state.json";

/// Persistent agent state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentState {
    pub last_health_check: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    pub quota_remaining: Option<u64>,
    pub quota_limit: Option<u64>,
    pub last_error: Option<String>,
    /// Work items already handled, so a restart does not repeat them.
    pub processed_issues: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            last_health_check: None,
            is_healthy: true,
            quota_remaining: None,
            quota_limit: None,
            last_error: None,
            processed_issues: Vec::new(),
            metadata: Map::new(),
        }
    }
}

impl AgentState {
    /// Overwrite the health fields from `report`, leaving bookkeeping alone.
    ///
    /// Quota comes from the most constrained service that reported one; the
    /// error is the first one found in service-name order.
    pub fn apply_report(&mut self, report: &HealthReport) {
        self.last_health_check = Some(report.timestamp);
        self.is_healthy = report.is_healthy();

        let tightest = report
            .services
            .iter()
            .filter(|s| s.quota.remaining.is_some())
            .min_by_key(|s| s.quota.remaining);
        self.quota_remaining = tightest.and_then(|s| s.quota.remaining);
        self.quota_limit = tightest.and_then(|s| s.quota.limit);

        self.last_error = report.services.iter().find_map(|s| s.last_error.clone());
    }

    pub fn mark_processed(&mut self, issue: impl Into<String>) -> bool {
        let issue = issue.into();
        if self.processed_issues.contains(&issue) {
            return false;
        }
        self.processed_issues.push(issue);
        true
    }

    pub fn is_processed(&self, issue: &str) -> bool {
        self.processed_issues.iter().any(|i| i == issue)
    }
}

pub struct StateManager {
    path: PathBuf,
}

impl StateManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(STATE_FILENAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save the state to disk
    pub async fn save(&self, state: &AgentState) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        fs::write(&self.path, json)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;

        debug!(path = %self.path.display(), "agent state saved");
        Ok(())
    }

    /// Load state from disk; a missing file is a fresh state.
    pub async fn load(&self) -> Result<AgentState, StorageError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AgentState::default()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        Ok(serde_json::from_str(&json)?)
    }

    /// Load, apply `change`, save. Returns the state that was written.
    pub async fn update<F>(&self, change: F) -> Result<AgentState, StorageError>
    where
        F: FnOnce(&mut AgentState),
    {
        let mut state = self.load().await?;
        change(&mut state);
        self.save(&state).await?;
        Ok(state)
    }

    /// Clear the state file
    pub async fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }
}
