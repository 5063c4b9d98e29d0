//! End-to-end orchestrator flows over a real JSONL audit log.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ops_agency::health::HealthStatus;
use ops_agency::resilience::{BackoffPolicy, CallContext, CallOutcome, CancelHandle, ExecutorError, RequestExecutor};
use ops_agency::storage::{AuditStatus, AuditStore, JsonlAuditStore};
use ops_agency::{ActionRequest, AgencyConfig, AgencyError, Orchestrator};
use serde_json::json;
use tempfile::TempDir;

fn setup() -> (TempDir, AgencyConfig) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgencyConfig::default();
    config.storage.audit_log_path = dir.path().join("audit.jsonl");
    config.storage.state_file_path = dir.path().join("agent_state.json");
    (dir, config)
}

fn policy(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(1), 0.0, max_attempts).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_exhaustion_is_audited_with_suggestion() {
    let (dir, config) = setup();
    let orchestrator = Orchestrator::from_config(&config).with_executor("linear", RequestExecutor::with_seed(policy(3), 1));

    let calls = AtomicU32::new(0);
    let err = orchestrator
        .execute("linear", "create_issue", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<CallOutcome<()>, _>(ExecutorError::RateLimited("429 Too Many Requests".into())) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(
        err,
        AgencyError::Operation(ExecutorError::RateLimitExceeded { attempts: 3, .. })
    ));

    let store = JsonlAuditStore::new(dir.path().join("audit.jsonl"), 0);
    let entries = store.read_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Failure);
    assert_eq!(entries[0].action, "create_issue");
    assert_eq!(
        entries[0].suggestion.as_deref(),
        Some("Implement longer backoff delays or reduce request frequency")
    );
    assert_eq!(entries[0].details["attempts"], json!(3));
    assert_eq!(entries[0].details["kind"], json!("permanent"));

    let linear = orchestrator.health().service("linear").await.unwrap();
    assert_eq!(linear.status, HealthStatus::Degraded);
    assert!(linear.last_error.unwrap().contains("rate limit"));
}

#[tokio::test]
async fn test_health_state_machine_through_orchestrator() {
    let (_dir, config) = setup();
    let orchestrator = Orchestrator::from_config(&config);

    // Healthy -> Degraded on low quota
    orchestrator
        .execute("github", "list_prs", || async { Ok(CallOutcome::new(()).with_quota(Some(150), Some(1000))) })
        .await
        .unwrap();
    assert_eq!(orchestrator.health_status().await, HealthStatus::Degraded);
    assert!(orchestrator.should_accept_work().await);

    // Degraded -> Unhealthy on exhaustion
    orchestrator
        .execute("github", "list_prs", || async { Ok(CallOutcome::new(()).with_quota(Some(0), Some(1000))) })
        .await
        .unwrap();
    assert_eq!(orchestrator.health_status().await, HealthStatus::Unhealthy);
    assert!(!orchestrator.should_accept_work().await);

    let report = orchestrator.check_health().await;
    assert!(report.service("github").unwrap().quota.exhausted);
    assert!(report.summary().contains("github Quota: 0/1000"));

    // An error on an exhausted service keeps it unhealthy
    let _ = orchestrator
        .execute("github", "get_pr", || async { Err::<CallOutcome<()>, _>(ExecutorError::NotFound("pr 3".into())) })
        .await;
    assert_eq!(orchestrator.health_status().await, HealthStatus::Unhealthy);

    // Fresh quota alone does not recover while an error is recorded
    orchestrator.update_quota("github", Some(900), Some(1000)).await;
    assert_eq!(orchestrator.health_status().await, HealthStatus::Degraded);

    orchestrator.clear_errors().await;
    assert_eq!(orchestrator.health_status().await, HealthStatus::Healthy);
    assert!(orchestrator.is_healthy().await);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_backoff_and_is_audited() {
    let (_dir, config) = setup();
    let orchestrator = Orchestrator::from_config(&config).with_executor("linear", RequestExecutor::with_seed(policy(10), 2));

    let request = ActionRequest::new("linear", "sync_labels")
        .with_detail("team", "ENG")
        .with_context(CallContext::new().with_timeout(Duration::from_millis(250)));

    let err = orchestrator
        .execute_with(request, || async { Err::<CallOutcome<()>, _>(ExecutorError::Timeout("upstream".into())) })
        .await
        .unwrap_err();
    // Attempts at 0ms and 100ms; the 200ms backoff would end past the deadline.
    assert!(matches!(
        err.operation_error(),
        Some(ExecutorError::DeadlineExceeded { attempts: 2 })
    ));

    let failures = orchestrator.audit().read_failures().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].details["team"], json!("ENG"));
    assert_eq!(failures[0].details["attempts"], json!(2));
    assert!(orchestrator.is_healthy().await);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_from_another_task() {
    let (_dir, config) = setup();
    let orchestrator = Arc::new(
        Orchestrator::from_config(&config).with_executor("linear", RequestExecutor::with_seed(policy(10), 3)),
    );

    let handle = CancelHandle::new();
    let canceller = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let request = ActionRequest::new("linear", "bulk_update").with_context(CallContext::new().with_cancel(handle));
    let err = orchestrator
        .execute_with(request, || async { Err::<CallOutcome<()>, _>(ExecutorError::Connection("reset".into())) })
        .await
        .unwrap_err();
    assert!(matches!(err.operation_error(), Some(ExecutorError::Cancelled { attempts: 2 })));
}

#[tokio::test]
async fn test_audit_cap_and_manual_truncation() {
    let (_dir, mut config) = setup();
    config.storage.max_audit_entries = 10;
    let orchestrator = Orchestrator::from_config(&config);

    for i in 0..11u32 {
        orchestrator
            .execute("linear", "noop", || async move { Ok(CallOutcome::new(i)) })
            .await
            .unwrap();
    }
    // Crossing the cap compacts to 80% of it.
    assert_eq!(orchestrator.audit().read_all().await.unwrap().len(), 8);

    let removed = orchestrator.truncate_audit(Some(3)).await.unwrap();
    assert_eq!(removed, 5);
    assert_eq!(orchestrator.audit().read_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_state_persists_across_instances() {
    let (_dir, config) = setup();

    {
        let orchestrator = Orchestrator::from_config(&config);
        orchestrator.update_quota("linear", Some(1200), Some(1500)).await;
        orchestrator.mark_processed("ENG-42").await.unwrap();
        orchestrator.save_state().await.unwrap();
    }

    let orchestrator = Orchestrator::from_config(&config);
    let state = orchestrator.load_state().await.unwrap();
    assert!(state.is_healthy);
    assert_eq!(state.quota_remaining, Some(1200));
    assert_eq!(state.quota_limit, Some(1500));
    assert!(state.is_processed("ENG-42"));
    assert!(state.last_health_check.is_some());
}
