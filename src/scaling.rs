use crate::api::WorkflowServiceSpec;
use crate::config::OperatorConfig;
use crate::errors::{Error, Result};
use crate::poll::{self, Budget};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use tracing::{info, warn};

/// Names of the deployments serving this topology, in reconcile order.
pub fn managed_names(spec: &WorkflowServiceSpec, config: &OperatorConfig) -> Vec<String> {
    if spec.workflow.lite_enabled {
        vec![config.lite_deployment.clone()]
    } else {
        config.managed_deployments.clone()
    }
}

/// Deployment names paired with their configured replica counts.
pub fn scale_targets(spec: &WorkflowServiceSpec, config: &OperatorConfig) -> Vec<(String, i32)> {
    if spec.workflow.lite_enabled {
        vec![(config.lite_deployment.clone(), spec.lite.replicas.unwrap_or(1))]
    } else {
        config
            .managed_deployments
            .iter()
            .map(|name| (name.clone(), spec.replicas_for(name)))
            .collect()
    }
}

async fn set_replicas(api: &Api<Deployment>, name: &str, replicas: i32) -> Result<()> {
    let patch = serde_json::json!({"spec": {"replicas": replicas}});
    api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Scale the named deployments to zero and wait for their pods to drain.
///
/// Best effort by design: a missing deployment means the environment is not
/// fully deployed, so the remaining scale-downs are skipped; pods still
/// terminating after the wait budget are logged and left behind. Only real
/// API errors propagate.
pub async fn scale_down(
    client: &Client,
    namespace: &str,
    config: &OperatorConfig,
    names: &[String],
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    for name in names {
        if api.get_opt(name).await?.is_none() {
            info!("deployment '{name}' not found, skipping scale down");
            return Ok(());
        }
        info!("scaling down '{name}'");
        set_replicas(&api, name, 0).await?;
        let outcome = poll::await_condition(
            config.scale_poll_interval,
            Budget::Attempts(config.scale_down_attempts),
            || async {
                let dep = api.get(name).await?;
                let drained = dep
                    .status
                    .map(|s| s.replicas.unwrap_or(0) == 0)
                    .unwrap_or(true);
                Ok::<_, Error>(drained)
            },
        )
        .await?;
        if !outcome.satisfied() {
            warn!("'{name}' still has pods after scale down wait, continuing");
        }
    }
    Ok(())
}

/// Set replica counts without waiting for availability. Used by switchover
/// in no-wait mode, where the orchestrator above us owns the waiting.
pub async fn scale_up_nowait(
    client: &Client,
    namespace: &str,
    targets: &[(String, i32)],
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    for (name, replicas) in targets {
        info!("scaling up '{name}' to {replicas} (not waiting)");
        set_replicas(&api, name, *replicas).await?;
    }
    Ok(())
}

/// Scale the named deployments to their target replica counts, then wait for
/// the whole set to become available. All replicas are set up front so the
/// rollouts proceed in parallel under one shared wait budget. Best effort
/// like scale-down: deployments still unavailable when the budget runs out
/// are logged and left to finish on their own.
pub async fn scale_up(
    client: &Client,
    namespace: &str,
    config: &OperatorConfig,
    targets: &[(String, i32)],
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    for (name, replicas) in targets {
        info!("scaling up '{name}' to {replicas}");
        set_replicas(&api, name, *replicas).await?;
    }
    let outcome = poll::await_condition(
        config.scale_poll_interval,
        Budget::Attempts(config.scale_up_attempts),
        || async {
            for (name, replicas) in targets {
                let dep = api.get(name).await?;
                let available = dep
                    .status
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0);
                if available < *replicas {
                    return Ok::<_, Error>(false);
                }
            }
            Ok(true)
        },
    )
    .await?;
    if !outcome.satisfied() {
        warn!("workloads not fully available after the scale up wait, continuing");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mock_client, timeout_after_1s, Scenario};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn scale_up_exhaustion_is_logged_not_fatal() {
        let (client, verifier) = mock_client();
        let log = Arc::new(Mutex::new(Vec::new()));
        let scenario = verifier.run(Scenario::RecordingApiServer(log.clone()));

        let config = OperatorConfig::test();
        let targets = vec![("workflow-api".to_string(), 2)];
        // The mock never reports availability for scale-patched deployments,
        // so the wait budget runs out. That must not fail the caller.
        scale_up(&client, "default", &config, &targets)
            .await
            .unwrap();
        drop(client);
        timeout_after_1s(scenario).await;

        let log = log.lock().unwrap();
        assert!(log
            .iter()
            .any(|l| l.contains("PATCH") && l.contains("/deployments/workflow-api/scale")));
    }
}
