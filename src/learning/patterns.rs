//! Known failure signatures and the fix each one suggests.
//!
//! Matching is a case-insensitive substring test against the table in order;
//! the first hit wins.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePattern {
    pub needle: &'static str,
    pub suggestion: &'static str,
}

pub const FAILURE_PATTERNS: &[FailurePattern] = &[
    FailurePattern {
        needle: "rate limit",
        suggestion: "Implement longer backoff delays or reduce request frequency",
    },
    FailurePattern {
        needle: "not found",
        suggestion: "Verify resource IDs before making requests",
    },
    FailurePattern {
        needle: "unauthorized",
        suggestion: "Check API key validity and permissions",
    },
    FailurePattern {
        needle: "timeout",
        suggestion: "Increase timeout settings or retry with exponential backoff",
    },
    FailurePattern {
        needle: "invalid",
        suggestion: "Validate input parameters before making API calls",
    },
    FailurePattern {
        needle: "permission",
        suggestion: "Verify API key has required scopes",
    },
    FailurePattern {
        needle: "quota",
        suggestion: "Monitor quota usage and implement request throttling",
    },
];

/// Suggestion for a single failure that matches no known pattern.
pub const FALLBACK_SUGGESTION: &str = "Review error logs and consider adding specific error handling";

/// Suggestion for a group whose dominant failures match no known pattern.
pub const UNKNOWN_GROUP_SUGGESTION: &str = "Investigate and add specific error handling";

/// Index into [`FAILURE_PATTERNS`] of the first pattern `error` contains.
pub fn classify(error: &str) -> Option<usize> {
    let lowered = error.to_lowercase();
    FAILURE_PATTERNS.iter().position(|p| lowered.contains(p.needle))
}

pub fn suggest_fix(error: &str) -> &'static str {
    classify(error)
        .map(|idx| FAILURE_PATTERNS[idx].suggestion)
        .unwrap_or(FALLBACK_SUGGESTION)
}
