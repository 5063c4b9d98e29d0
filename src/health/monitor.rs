//! Health Monitor
//!
//! Owns the live per-service health map. Every mutation runs under one write
//! lock, so a single `update_quota` or `record_error` is fully applied before
//! the next reader observes the state. The monitor never fails: it only
//! changes the status it reports.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{HealthReport, HealthStatus, QuotaInfo, ServiceHealth, DEFAULT_LOW_QUOTA_RATIO};

#[derive(Debug, Default)]
struct MonitorState {
    services: BTreeMap<String, ServiceHealth>,
    overall: HealthStatus,
    last_report: Option<HealthReport>,
}

impl MonitorState {
    fn service_mut(&mut self, name: &str) -> &mut ServiceHealth {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| ServiceHealth::new(name))
    }

    fn refresh_service(&mut self, name: &str, low_quota_ratio: f64) {
        let service = self.service_mut(name);
        let next = service.derive_status(low_quota_ratio);
        if next != service.status {
            match next {
                HealthStatus::Healthy => info!(service = name, from = %service.status, "service recovered"),
                _ => warn!(service = name, from = %service.status, to = %next, "service health changed"),
            }
            service.status = next;
        }
        self.refresh_overall();
    }

    fn refresh_overall(&mut self) {
        let next = self
            .services
            .values()
            .map(|s| s.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        if next != self.overall {
            info!(from = %self.overall, to = %next, "overall health changed");
            self.overall = next;
        }
    }
}

pub struct HealthMonitor {
    low_quota_ratio: f64,
    state: RwLock<MonitorState>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_low_quota_ratio(DEFAULT_LOW_QUOTA_RATIO)
    }

    pub fn with_low_quota_ratio(low_quota_ratio: f64) -> Self {
        Self {
            low_quota_ratio,
            state: RwLock::new(MonitorState::default()),
        }
    }

    /// Start out tracking `services`, each healthy with unknown quota.
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state.get_mut();
        for service in services {
            state.service_mut(service.as_ref());
        }
        self
    }

    /// Track `service` from now on, as healthy with unknown quota.
    pub async fn register_service(&self, service: &str) {
        let mut state = self.state.write().await;
        state.service_mut(service);
    }

    pub async fn update_quota(&self, service: &str, remaining: Option<u64>, limit: Option<u64>) {
        let mut state = self.state.write().await;
        let entry = state.service_mut(service);
        entry.quota = QuotaInfo::new(remaining, limit);
        entry.last_check = Some(Utc::now());
        debug!(service, ?remaining, ?limit, "quota updated");
        state.refresh_service(service, self.low_quota_ratio);
    }

    /// Marks the service at least degraded; an exhausted quota keeps it unhealthy.
    pub async fn record_error(&self, service: &str, error: &str) {
        let mut state = self.state.write().await;
        let entry = state.service_mut(service);
        entry.last_error = Some(error.to_string());
        entry.last_check = Some(Utc::now());
        state.refresh_service(service, self.low_quota_ratio);
    }

    /// Forget every recorded error and re-derive statuses from quota alone.
    pub async fn clear_errors(&self) {
        let mut state = self.state.write().await;
        let names: Vec<String> = state.services.keys().cloned().collect();
        for name in names {
            state.service_mut(&name).last_error = None;
            state.refresh_service(&name, self.low_quota_ratio);
        }
    }

    /// Snapshot current state; the snapshot also becomes `last_report`.
    pub async fn check_health(&self) -> HealthReport {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for service in state.services.values_mut() {
            service.last_check = Some(now);
        }
        let report = HealthReport {
            overall_status: state.overall,
            services: state.services.values().cloned().collect(),
            timestamp: now,
        };
        state.last_report = Some(report.clone());
        debug!(status = %report.overall_status, services = report.services.len(), "health check completed");
        report
    }

    pub async fn last_report(&self) -> Option<HealthReport> {
        self.state.read().await.last_report.clone()
    }

    pub async fn status(&self) -> HealthStatus {
        self.state.read().await.overall
    }

    pub async fn service(&self, name: &str) -> Option<ServiceHealth> {
        self.state.read().await.services.get(name).cloned()
    }

    pub async fn is_quota_exhausted(&self) -> bool {
        self.state.read().await.services.values().any(|s| s.quota.exhausted)
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
