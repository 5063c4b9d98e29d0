//! Self-Learning Module
//!
//! Mines the audit trail for recurring failures and turns them into
//! confidence-scored recommendations plus per-action statistics.

pub mod analyzer;
pub mod patterns;

pub use analyzer::LearningAnalyzer;
pub use patterns::{suggest_fix, FailurePattern, FAILURE_PATTERNS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Occurrences at which a recommendation reaches full confidence.
pub const DEFAULT_CONFIDENCE_SATURATION: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub suggestion: String,
    /// In `[0, 1]`, grows with the dominant pattern's match count.
    pub confidence: f64,
    pub failure_count: usize,
    /// Up to three raw error strings from the group.
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    pub action: String,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Most frequent (truncated) error strings with their counts, at most three.
    pub common_errors: Vec<(String, usize)>,
}

impl ActionStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_count as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningReport {
    pub total_actions: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub action_stats: Vec<ActionStats>,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

impl LearningReport {
    pub fn empty() -> Self {
        Self {
            total_actions: 0,
            success_count: 0,
            failure_count: 0,
            action_stats: Vec::new(),
            recommendations: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn overall_success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_actions as f64
    }

    /// Human-readable digest of the top five recommendations.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "=== Self-Learning Summary ===".to_string(),
            format!("Total Actions: {}", self.total_actions),
            format!("Success Rate: {:.1}%", self.overall_success_rate() * 100.0),
            String::new(),
        ];

        if self.recommendations.is_empty() {
            lines.push("No recommendations - keep up the good work!".to_string());
        } else {
            lines.push("Top Recommendations:".to_string());
            for (i, rec) in self.recommendations.iter().take(5).enumerate() {
                lines.push(format!("  {}. {}: {}", i + 1, rec.action, rec.suggestion));
                lines.push(format!(
                    "     (Confidence: {:.0}%, Failures: {})",
                    rec.confidence * 100.0,
                    rec.failure_count
                ));
            }
        }

        lines.join("\n")
    }
}
