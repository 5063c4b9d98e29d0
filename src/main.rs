//! Ops Agency
//!
//! Loads configuration, reports the last known agent state, current health
//! and what the audit trail suggests fixing.

use anyhow::{Context, Result};
use tracing::info;

use ops_agency::utils::init_telemetry;
use ops_agency::{AgencyConfig, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgencyConfig::load(None).context("Failed to load configuration")?;
    let _telemetry = init_telemetry(&config.logging).context("Failed to initialize logging")?;

    info!(
        audit_log = %config.storage.audit_log_path.display(),
        services = config.services.len(),
        "ops agency starting"
    );

    let orchestrator = Orchestrator::from_config(&config);

    let previous = orchestrator.load_state().await.context("Failed to load agent state")?;
    if let Some(checked) = previous.last_health_check {
        info!(
            healthy = previous.is_healthy,
            processed = previous.processed_issues.len(),
            "previous state from {}",
            checked.to_rfc3339()
        );
    }

    let report = orchestrator.check_health().await;
    println!("{}\n", report.summary());

    let summary = orchestrator
        .get_improvement_summary()
        .await
        .context("Failed to analyze audit log")?;
    println!("{}", summary);

    orchestrator.save_state().await.context("Failed to save agent state")?;
    Ok(())
}
