//! Failure Analyzer
//!
//! Batch pass over an audit snapshot. The snapshot is taken once per call, so
//! every figure in a report describes the same point in time and analysis
//! never holds the store's write gate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::patterns::{classify, FAILURE_PATTERNS, UNKNOWN_GROUP_SUGGESTION};
use super::{ActionStats, LearningReport, Recommendation, DEFAULT_CONFIDENCE_SATURATION};
use crate::storage::{AuditEntry, AuditSnapshot, AuditStore, StorageError};
use crate::utils::truncate_prefix;

const MAX_EXAMPLES: usize = 3;
const MAX_COMMON_ERRORS: usize = 3;
const COMMON_ERROR_CHARS: usize = 100;

pub struct LearningAnalyzer {
    store: Arc<dyn AuditStore>,
    confidence_saturation: u32,
}

impl LearningAnalyzer {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self::with_confidence_saturation(store, DEFAULT_CONFIDENCE_SATURATION)
    }

    pub fn with_confidence_saturation(store: Arc<dyn AuditStore>, confidence_saturation: u32) -> Self {
        Self {
            store,
            confidence_saturation: confidence_saturation.max(1),
        }
    }

    pub async fn analyze_failures(&self) -> Result<Vec<Recommendation>, StorageError> {
        let snapshot = self.store.snapshot().await?;
        Ok(recommend(snapshot.failures(), self.confidence_saturation))
    }

    pub async fn get_action_stats(&self) -> Result<Vec<ActionStats>, StorageError> {
        let snapshot = self.store.snapshot().await?;
        Ok(action_stats(snapshot.entries()))
    }

    pub async fn generate_report(&self) -> Result<LearningReport, StorageError> {
        let snapshot = self.store.snapshot().await?;
        Ok(build_report(&snapshot, self.confidence_saturation))
    }

    pub async fn get_improvement_summary(&self) -> Result<String, StorageError> {
        Ok(self.generate_report().await?.summary())
    }
}

pub fn build_report(snapshot: &AuditSnapshot, confidence_saturation: u32) -> LearningReport {
    let entries = snapshot.entries();
    let failure_count = snapshot.failures().count();
    let report = LearningReport {
        total_actions: entries.len(),
        success_count: entries.len() - failure_count,
        failure_count,
        action_stats: action_stats(entries),
        recommendations: recommend(snapshot.failures(), confidence_saturation),
        generated_at: Utc::now(),
    };
    debug!(
        total = report.total_actions,
        failures = report.failure_count,
        recommendations = report.recommendations.len(),
        "learning report generated"
    );
    report
}

/// Group entries by action, keeping groups in first-seen order.
fn group_by_action<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> Vec<(&'a str, Vec<&'a AuditEntry>)> {
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut groups: Vec<(&'a str, Vec<&'a AuditEntry>)> = Vec::new();
    for entry in entries {
        let slot = *index.entry(entry.action.as_str()).or_insert_with(|| {
            groups.push((entry.action.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(entry);
    }
    groups
}

/// One recommendation per failing action, most failures first.
///
/// An action's suggestion comes from its most frequent failure pattern.
/// Equally frequent patterns resolve by their order in `FAILURE_PATTERNS`,
/// with unmatched errors last, not by which was seen first.
pub fn recommend<'a>(failures: impl IntoIterator<Item = &'a AuditEntry>, confidence_saturation: u32) -> Vec<Recommendation> {
    let saturation = confidence_saturation.max(1) as f64;
    let unknown = FAILURE_PATTERNS.len();

    let mut recommendations: Vec<Recommendation> = group_by_action(failures)
        .into_iter()
        .filter_map(|(action, group)| {
            // Slot per table row, plus a trailing "unknown" slot.
            let mut votes = vec![0usize; FAILURE_PATTERNS.len() + 1];
            for error in group.iter().filter_map(|e| e.error.as_deref()) {
                votes[classify(error).unwrap_or(unknown)] += 1;
            }

            // Strictly-greater keeps the earliest slot on ties.
            let (top, count) = votes
                .iter()
                .enumerate()
                .fold((unknown, 0), |best, (slot, &n)| if n > best.1 { (slot, n) } else { best });
            if count == 0 {
                return None;
            }

            let suggestion = if top == unknown {
                UNKNOWN_GROUP_SUGGESTION
            } else {
                FAILURE_PATTERNS[top].suggestion
            };

            Some(Recommendation {
                action: action.to_string(),
                suggestion: suggestion.to_string(),
                confidence: (count as f64 / saturation).min(1.0),
                failure_count: group.len(),
                examples: group
                    .iter()
                    .filter_map(|e| e.error.clone())
                    .take(MAX_EXAMPLES)
                    .collect(),
            })
        })
        .collect();

    recommendations.sort_by(|a, b| b.failure_count.cmp(&a.failure_count));
    recommendations
}

/// Per-action counts, busiest action first.
pub fn action_stats(entries: &[AuditEntry]) -> Vec<ActionStats> {
    let mut stats: Vec<ActionStats> = group_by_action(entries)
        .into_iter()
        .map(|(action, group)| {
            let failures: Vec<&AuditEntry> = group.iter().copied().filter(|e| e.is_failure()).collect();

            // (error, count) in first-seen order.
            let mut errors: Vec<(String, usize)> = Vec::new();
            for error in failures.iter().filter_map(|e| e.error.as_deref()) {
                let short = truncate_prefix(error, COMMON_ERROR_CHARS);
                match errors.iter_mut().find(|(seen, _)| seen == short) {
                    Some((_, n)) => *n += 1,
                    None => errors.push((short.to_string(), 1)),
                }
            }
            errors.sort_by(|a, b| b.1.cmp(&a.1));
            errors.truncate(MAX_COMMON_ERRORS);

            ActionStats {
                action: action.to_string(),
                total_count: group.len(),
                success_count: group.len() - failures.len(),
                failure_count: failures.len(),
                common_errors: errors,
            }
        })
        .collect();

    stats.sort_by(|a, b| b.total_count.cmp(&a.total_count));
    stats
}
