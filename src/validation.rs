use crate::api::{ConditionType, WorkflowService};
use crate::config::OperatorConfig;
use crate::errors::{Error, Result};
use crate::lifecycle;
use crate::poll::{self, Budget};
use crate::resources;
use crate::scaling;
use crate::status::StatusReporter;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::client::Client;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Condition type the test workload writes onto the operator's own
/// deployment to publish its terminal verdict.
pub const TEST_RESULT_CONDITION: &str = "IntegrationTestsExecutionStatus";

/// Attempts that fit the given timeout at the given poll interval, never
/// fewer than one.
fn attempts_for(timeout_secs: u64, interval: Duration) -> u32 {
    let interval_secs = interval.as_secs().max(1);
    (timeout_secs / interval_secs).max(1) as u32
}

/// Wait until every deployment of the topology reports its configured
/// replica count available. Exhaustion is terminal: handing a half-ready
/// service to the test workload would only produce noise.
pub async fn ensure_ready(
    client: &Client,
    namespace: &str,
    cr: &WorkflowService,
    config: &OperatorConfig,
    reporter: &StatusReporter<'_>,
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let attempts = attempts_for(
        cr.spec.integration_tests.service_ready_timeout,
        config.ready_check_interval,
    );
    for (name, replicas) in scaling::scale_targets(&cr.spec, config) {
        let outcome = poll::await_condition(
            config.ready_check_interval,
            Budget::Attempts(attempts),
            || async {
                let dep = api.get(&name).await?;
                let available = dep
                    .status
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0);
                Ok::<_, Error>(available >= replicas)
            },
        )
        .await?;
        if !outcome.satisfied() {
            return Err(reporter
                .fail(&format!("Deployment {name} did not become ready in time"))
                .await);
        }
        info!("'{name}' is ready");
    }
    Ok(())
}

/// Terminal test verdict from the operator deployment's conditions, if the
/// workload has published one.
fn read_verdict(dep: &Deployment) -> Option<(bool, String)> {
    let conditions = dep.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .find(|c| c.type_ == TEST_RESULT_CONDITION)
        .map(|c| {
            (
                c.status == "True",
                c.message.clone().unwrap_or_default(),
            )
        })
}

/// Drop a verdict left over from a previous run so a stale pass can never be
/// mistaken for the new result.
async fn clear_verdict(api: &Api<Deployment>, name: &str) -> Result<()> {
    let Some(dep) = api.get_opt(name).await? else {
        return Ok(());
    };
    let Some(conditions) = dep.status.as_ref().and_then(|s| s.conditions.clone()) else {
        return Ok(());
    };
    if !conditions.iter().any(|c| c.type_ == TEST_RESULT_CONDITION) {
        return Ok(());
    }
    let remaining: Vec<_> = conditions
        .into_iter()
        .filter(|c| c.type_ != TEST_RESULT_CONDITION)
        .collect();
    let patch = serde_json::json!({"status": {"conditions": remaining}});
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn await_verdict(
    api: Api<Deployment>,
    operator_deployment: String,
    interval: Duration,
    attempts: u32,
) -> Result<Option<(bool, String)>> {
    let outcome = poll::await_condition(interval, Budget::Attempts(attempts), || async {
        let dep = api.get(&operator_deployment).await?;
        Ok::<_, Error>(read_verdict(&dep).is_some())
    })
    .await?;
    if !outcome.satisfied() {
        return Ok(None);
    }
    let dep = api.get(&operator_deployment).await?;
    Ok(read_verdict(&dep))
}

/// Launch the integration-test workload and collect its verdict.
///
/// In blocking mode the reconcile pass waits for the verdict and a failed
/// run fails the pass. Otherwise the wait moves to a background task that
/// only writes conditions; the returned handle lets the next pass cancel a
/// watch made stale by a new rollout.
pub async fn run_integration_tests(
    client: &Client,
    namespace: &str,
    cr: &WorkflowService,
    config: &OperatorConfig,
    reporter: &StatusReporter<'_>,
) -> Result<Option<JoinHandle<()>>> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    lifecycle::delete_then_await_gone(
        &deployments,
        &config.tests_deployment,
        config.delete_poll_interval,
    )
    .await?;
    clear_verdict(&deployments, &config.operator_deployment).await?;
    sleep(config.tests_recreate_settle).await;

    info!("starting integration tests");
    let body = resources::deployment::tests_deployment(cr, config);
    deployments.create(&PostParams::default(), &body).await?;
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    lifecycle::ensure_created(
        &services,
        &config.tests_deployment,
        &resources::service::tests_service(cr, config),
    )
    .await?;

    let attempts = attempts_for(
        cr.spec.integration_tests.wait_test_result_timeout,
        config.test_poll_interval,
    );

    // Benchmark runs take too long to hold a reconcile pass open; their
    // verdict is always collected in the background.
    let blocking = cr.spec.integration_tests.wait_test_result_on_job
        && !cr.spec.integration_tests.run_benchmarks;
    if blocking {
        let verdict = await_verdict(
            deployments,
            config.operator_deployment.clone(),
            config.test_poll_interval,
            attempts,
        )
        .await?;
        return match verdict {
            Some((true, message)) => {
                reporter
                    .report(ConditionType::Successful, None, &format!("Tests passed. {message}"))
                    .await?;
                Ok(None)
            }
            Some((false, message)) => Err(reporter.fail(&format!("Tests failed: {message}")).await),
            None => Err(reporter.fail("Tests did not finish in time").await),
        };
    }

    // Background watch: conditions only, nothing to fail.
    let namespace = namespace.to_string();
    let name = cr.metadata.name.clone().unwrap_or_default();
    let client = client.clone();
    let config_owned = config.clone();
    let interval = config.test_poll_interval;
    let handle = tokio::spawn(async move {
        let reporter = StatusReporter::new(&client, &namespace, &name, &config_owned);
        let result = await_verdict(
            deployments,
            config_owned.operator_deployment.clone(),
            interval,
            attempts,
        )
        .await;
        let report = match result {
            Ok(Some((true, message))) => {
                reporter
                    .report(ConditionType::Successful, None, &format!("Tests passed. {message}"))
                    .await
            }
            Ok(Some((false, message))) => {
                reporter
                    .report(
                        ConditionType::Failed,
                        Some("Error"),
                        &format!("Tests failed: {message}"),
                    )
                    .await
            }
            Ok(None) => {
                reporter
                    .report(ConditionType::Failed, Some("Error"), "Tests did not finish in time")
                    .await
            }
            Err(e) => {
                warn!("test result watch aborted: {e}");
                Ok(())
            }
        };
        if let Err(e) = report {
            warn!("could not write test result condition: {e}");
        }
    });
    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};

    fn dep_with_condition(type_: &str, status: &str, message: &str) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                conditions: Some(vec![DeploymentCondition {
                    type_: type_.to_string(),
                    status: status.to_string(),
                    message: Some(message.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn verdict_reads_only_the_test_condition() {
        let dep = dep_with_condition(TEST_RESULT_CONDITION, "True", "all green");
        assert_eq!(read_verdict(&dep), Some((true, "all green".to_string())));

        let dep = dep_with_condition(TEST_RESULT_CONDITION, "False", "3 failures");
        assert_eq!(read_verdict(&dep), Some((false, "3 failures".to_string())));

        let dep = dep_with_condition("Available", "True", "");
        assert_eq!(read_verdict(&dep), None);
    }

    #[test]
    fn attempt_budget_covers_the_timeout() {
        assert_eq!(attempts_for(900, Duration::from_secs(5)), 180);
        assert_eq!(attempts_for(300, Duration::from_secs(10)), 30);
        assert_eq!(attempts_for(3, Duration::from_secs(10)), 1);
        // Millisecond intervals from test configs must not divide by zero.
        assert_eq!(attempts_for(10, Duration::from_millis(1)), 10);
    }
}
