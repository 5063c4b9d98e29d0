//! Learning over audit trails written by the orchestrator and by hand.

use std::sync::Arc;

use ops_agency::learning::{LearningAnalyzer, FAILURE_PATTERNS};
use ops_agency::resilience::{BackoffPolicy, CallOutcome, ExecutorError, RequestExecutor};
use ops_agency::storage::{AuditEntry, AuditStore, JsonlAuditStore, MemoryAuditStore};
use ops_agency::{AgencyConfig, Orchestrator};
use serde_json::Map;

async fn store_with(entries: Vec<AuditEntry>) -> Arc<MemoryAuditStore> {
    let store = Arc::new(MemoryAuditStore::default());
    for entry in &entries {
        store.append(entry).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_repeated_rate_limits_recommend_backoff() {
    let entries = (0..5)
        .map(|i| AuditEntry::failure("create_issue", format!("Rate limit hit on request {}", i), None, Map::new()))
        .collect();
    let analyzer = LearningAnalyzer::new(store_with(entries).await);

    let recs = analyzer.analyze_failures().await.unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].action, "create_issue");
    assert_eq!(recs[0].failure_count, 5);
    assert_eq!(recs[0].confidence, 0.5);
    assert_eq!(recs[0].suggestion, FAILURE_PATTERNS[0].suggestion);
}

#[tokio::test]
async fn test_two_of_three_succeeded() {
    let entries = vec![
        AuditEntry::success("list_teams", Map::new()),
        AuditEntry::success("create_issue", Map::new()),
        AuditEntry::failure("create_issue", "timeout: 30s", None, Map::new()),
    ];
    let report = LearningAnalyzer::new(store_with(entries).await).generate_report().await.unwrap();

    assert_eq!(report.total_actions, 3);
    assert!((report.overall_success_rate() - 0.6666).abs() < 1e-3);
    assert_eq!(report.action_stats[0].action, "create_issue");
    assert_eq!(report.action_stats[0].success_rate(), 0.5);
    assert_eq!(report.action_stats[0].common_errors, vec![("timeout: 30s".to_string(), 1)]);
}

#[tokio::test]
async fn test_configured_saturation() {
    let entries = (0..3)
        .map(|_| AuditEntry::failure("merge_pr", "permission denied", None, Map::new()))
        .collect();
    let analyzer = LearningAnalyzer::with_confidence_saturation(store_with(entries).await, 4);

    let recs = analyzer.analyze_failures().await.unwrap();
    assert_eq!(recs[0].confidence, 0.75);
}

#[tokio::test]
async fn test_report_from_orchestrated_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgencyConfig::default();
    config.storage.audit_log_path = dir.path().join("audit.jsonl");
    config.storage.state_file_path = dir.path().join("agent_state.json");
    let single_shot = BackoffPolicy::new(std::time::Duration::from_millis(1), 1.0, std::time::Duration::from_millis(1), 0.0, 1).unwrap();
    let orchestrator = Orchestrator::from_config(&config).with_executor("github", RequestExecutor::new(single_shot));

    for _ in 0..4 {
        let _ = orchestrator
            .execute("github", "fetch_pr", || async {
                Err::<CallOutcome<()>, _>(ExecutorError::NotFound("pull request 7".into()))
            })
            .await;
    }
    let _ = orchestrator
        .execute("github", "push_branch", || async {
            Err::<CallOutcome<()>, _>(ExecutorError::Unauthorized("bad credentials".into()))
        })
        .await;
    orchestrator
        .execute("github", "fetch_pr", || async { Ok(CallOutcome::new(7)) })
        .await
        .unwrap();

    let report = orchestrator.get_learning_report().await.unwrap();
    assert_eq!(report.total_actions, 6);
    assert_eq!(report.failure_count, 5);
    assert_eq!(report.recommendations[0].action, "fetch_pr");
    assert_eq!(report.recommendations[0].failure_count, 4);
    assert_eq!(report.recommendations[0].examples.len(), 3);
    assert_eq!(report.recommendations[1].action, "push_branch");
    assert_eq!(report.recommendations[1].suggestion, "Check API key validity and permissions");

    let summary = orchestrator.get_improvement_summary().await.unwrap();
    assert!(summary.starts_with("=== Self-Learning Summary ==="));
    assert!(summary.contains("Total Actions: 6"));
    assert!(summary.contains("Success Rate: 16.7%"));
    assert!(summary.contains("1. fetch_pr: Verify resource IDs before making requests"));

    // A second reader over the same file sees the same trail.
    let reread = LearningAnalyzer::new(Arc::new(JsonlAuditStore::new(dir.path().join("audit.jsonl"), 0)));
    assert_eq!(reread.get_action_stats().await.unwrap(), report.action_stats);
}

#[tokio::test]
async fn test_empty_trail_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = LearningAnalyzer::new(Arc::new(JsonlAuditStore::new(dir.path().join("never_written.jsonl"), 0)));

    let report = analyzer.generate_report().await.unwrap();
    assert_eq!(report.total_actions, 0);
    assert!(report.recommendations.is_empty());
    assert_eq!(report.overall_success_rate(), 0.0);
}
