//! Agency Configuration
//!
//! Layered: built-in defaults, then an optional YAML file, then `AGENCY_*`
//! environment overrides (a `.env` file is honored).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::health::DEFAULT_LOW_QUOTA_RATIO;
use crate::learning::DEFAULT_CONFIDENCE_SATURATION;
use crate::orchestrator::session::StateManager;
use crate::resilience::BackoffPolicy;
use crate::storage::audit::DEFAULT_MAX_ENTRIES;
use crate::storage::JsonlAuditStore;

pub const CONFIG_PATH_ENV: &str = "AGENCY_CONFIG";
pub const AUDIT_LOG_ENV: &str = "AGENCY_AUDIT_LOG";
pub const STATE_FILE_ENV: &str = "AGENCY_STATE_FILE";
pub const MAX_AUDIT_ENTRIES_ENV: &str = "AGENCY_MAX_AUDIT_ENTRIES";
pub const LOG_DIR_ENV: &str = "AGENCY_LOG_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub backoff: BackoffPolicy,
    /// Client-side pacing; unset means no pacing.
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub audit_log_path: PathBuf,
    pub state_file_path: PathBuf,
    /// 0 disables automatic compaction.
    pub max_audit_entries: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            audit_log_path: JsonlAuditStore::default_path(),
            state_file_path: StateManager::default_path(),
            max_audit_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub low_quota_ratio: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            low_quota_ratio: DEFAULT_LOW_QUOTA_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSettings {
    pub confidence_saturation: u32,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            confidence_saturation: DEFAULT_CONFIDENCE_SATURATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// When set, JSON-capable daily rolling files are written here too.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "ops_agency.log".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencyConfig {
    pub services: BTreeMap<String, ServiceSettings>,
    pub default_backoff: BackoffPolicy,
    pub storage: StorageSettings,
    pub health: HealthSettings,
    pub learning: LearningSettings,
    pub logging: LoggingSettings,
}

impl Default for AgencyConfig {
    fn default() -> Self {
        let services = ["linear", "github"]
            .into_iter()
            .map(|name| (name.to_string(), ServiceSettings::default()))
            .collect();
        Self {
            services,
            default_backoff: BackoffPolicy::default(),
            storage: StorageSettings::default(),
            health: HealthSettings::default(),
            learning: LearningSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AgencyConfig {
    /// Load from `path` (or `AGENCY_CONFIG`), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let from_env = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), services = config.services.len(), "config file loaded");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Apply overrides, reading variables through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(path) = lookup(AUDIT_LOG_ENV) {
            self.storage.audit_log_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(STATE_FILE_ENV) {
            self.storage.state_file_path = PathBuf::from(path);
        }
        if let Some(value) = lookup(MAX_AUDIT_ENTRIES_ENV) {
            self.storage.max_audit_entries = value.trim().parse().map_err(|_| ConfigError::Env {
                var: MAX_AUDIT_ENTRIES_ENV,
                value,
            })?;
        }
        if let Some(dir) = lookup(LOG_DIR_ENV) {
            self.logging.directory = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.health.low_quota_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::Invalid {
                field: "health.low_quota_ratio",
                reason: format!("{} is outside [0, 1]", ratio),
            });
        }
        if self.learning.confidence_saturation == 0 {
            return Err(ConfigError::Invalid {
                field: "learning.confidence_saturation",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some((name, _)) = self
            .services
            .iter()
            .find(|(_, s)| s.requests_per_minute == Some(0))
        {
            return Err(ConfigError::Invalid {
                field: "services.requests_per_minute",
                reason: format!("service {} has a pace of 0 requests per minute", name),
            });
        }
        Ok(())
    }
}
