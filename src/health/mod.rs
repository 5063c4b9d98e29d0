//! Health Module
//!
//! Quota and error state per external service, folded into a tri-state
//! signal that callers poll before taking on more work.

pub mod monitor;

pub use monitor::HealthMonitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fraction of the limit below which remaining quota counts as low.
pub const DEFAULT_LOW_QUOTA_RATIO: f64 = 0.20;

/// Ordered by severity: `Healthy < Degraded < Unhealthy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    pub exhausted: bool,
}

impl QuotaInfo {
    /// A zero limit carries no information and is stored as unknown.
    pub fn new(remaining: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            remaining,
            limit: limit.filter(|l| *l > 0),
            exhausted: remaining == Some(0),
        }
    }

    pub fn usage_percent(&self) -> Option<f64> {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) => Some((limit as f64 - remaining as f64) / limit as f64 * 100.0),
            _ => None,
        }
    }

    pub fn is_low_at(&self, ratio: f64) -> bool {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) => (remaining as f64) < limit as f64 * ratio,
            _ => false,
        }
    }

    pub fn is_low(&self) -> bool {
        self.is_low_at(DEFAULT_LOW_QUOTA_RATIO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    pub quota: QuotaInfo,
    pub last_error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
}

impl ServiceHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            quota: QuotaInfo::default(),
            last_error: None,
            last_check: None,
        }
    }

    /// Status implied by the current quota and error fields.
    pub fn derive_status(&self, low_quota_ratio: f64) -> HealthStatus {
        if self.quota.exhausted {
            HealthStatus::Unhealthy
        } else if self.quota.is_low_at(low_quota_ratio) || self.last_error.is_some() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Point-in-time view over every tracked service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub services: Vec<ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall_status == HealthStatus::Healthy
    }

    pub fn service(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Health Report ({})", self.timestamp.to_rfc3339()),
            format!("Overall Status: {}", self.overall_status),
        ];
        for service in &self.services {
            lines.push(format!("{}: {}", service.name, service.status));
            if let Some(remaining) = service.quota.remaining {
                let limit = service.quota.limit.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string());
                lines.push(format!("  {} Quota: {}/{}", service.name, remaining, limit));
            }
            if let Some(err) = &service.last_error {
                lines.push(format!("  {} Last Error: {}", service.name, err));
            }
        }
        lines.join("\n")
    }
}
