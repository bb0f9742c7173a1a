use crate::api::{DrMode, WorkflowService};
use crate::config::OperatorConfig;
use crate::errors::Result;
use crate::resources::job::JobKind;
use crate::status::StatusReporter;
use crate::{jobs, scaling};
use kube::client::Client;
use tracing::{info, warn};

/// Disaster-recovery switchover between sites.
///
/// The state record on the CR status is the contract with the orchestration
/// above us: "running" is written before any action so an operator crash
/// mid-switchover is observable, and a terminal "done" or "failed" is always
/// written afterwards. Switchover failures are recorded but never propagated;
/// the orchestrator reads the record, not our reconcile result.
pub async fn switchover(
    client: &Client,
    namespace: &str,
    cr: &WorkflowService,
    config: &OperatorConfig,
    reporter: &StatusReporter<'_>,
    mode_str: &str,
) -> Result<()> {
    let prior_mode = reporter.recorded_dr_mode().await?;
    reporter
        .set_disaster_recovery(mode_str, "running", None)
        .await?;

    let result = perform(client, namespace, cr, config, reporter, mode_str, prior_mode).await;
    match result {
        Ok(()) => {
            reporter
                .set_disaster_recovery(mode_str, "done", None)
                .await?;
            info!("switchover to '{mode_str}' done");
        }
        Err(e) => {
            warn!("switchover to '{mode_str}' failed: {e}");
            reporter
                .set_disaster_recovery(mode_str, "failed", Some(&e.to_string()))
                .await?;
        }
    }
    Ok(())
}

async fn perform(
    client: &Client,
    namespace: &str,
    cr: &WorkflowService,
    config: &OperatorConfig,
    reporter: &StatusReporter<'_>,
    mode_str: &str,
    prior_mode: Option<String>,
) -> Result<()> {
    let Some(mode) = DrMode::parse(mode_str) else {
        return Err(crate::errors::Error::Fatal(format!(
            "Unknown disaster recovery mode '{mode_str}'"
        )));
    };

    match mode {
        DrMode::Standby | DrMode::Disable => {
            info!("switchover to '{mode}': scaling workloads down");
            let names = scaling::managed_names(&cr.spec, config);
            scaling::scale_down(client, namespace, config, &names).await
        }
        DrMode::Active => {
            if prior_mode.is_none() {
                // Initial deployment already starts active; there is no
                // standby state to recover from.
                info!("first activation, nothing to switch over");
                return Ok(());
            }
            jobs::run_to_completion(
                client,
                namespace,
                cr,
                config,
                reporter,
                JobKind::DisasterRecovery,
                &[mode_str.to_string()],
            )
            .await?;
            let targets = scaling::scale_targets(&cr.spec, config);
            let no_wait = cr
                .spec
                .disaster_recovery
                .as_ref()
                .map(|d| d.no_wait)
                .unwrap_or(false);
            if no_wait {
                scaling::scale_up_nowait(client, namespace, &targets).await
            } else {
                scaling::scale_up(client, namespace, config, &targets).await
            }
        }
    }
}
