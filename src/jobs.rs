use crate::api::WorkflowService;
use crate::config::OperatorConfig;
use crate::errors::{Error, Result};
use crate::lifecycle;
use crate::poll::{self, Budget};
use crate::resources::job::{job, JobKind};
use crate::status::StatusReporter;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::client::Client;
use kube::ResourceExt;
use tracing::{info, warn};

/// Terminal state of a one-shot job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobVerdict {
    Succeeded,
    /// The job burned through its retry budget.
    FailedByStatus,
    /// The poll budget ran out before the job reached a terminal state.
    FailedByExhaustion,
}

/// Terminal verdict from job status counters, if the job is terminal yet.
pub fn classify(status_succeeded: Option<i32>, status_failed: Option<i32>) -> Option<JobVerdict> {
    if status_succeeded == Some(1) {
        Some(JobVerdict::Succeeded)
    } else if status_failed == Some(3) {
        Some(JobVerdict::FailedByStatus)
    } else {
        None
    }
}

/// Run a one-shot job to completion. Any stale instance from a previous pass
/// is deleted first and its removal awaited, so two instances never coexist.
/// Failure collects pod logs into the Failed condition and is terminal for
/// the pass.
pub async fn run_to_completion(
    client: &Client,
    namespace: &str,
    cr: &WorkflowService,
    config: &OperatorConfig,
    reporter: &StatusReporter<'_>,
    kind: JobKind,
    extra_args: &[String],
) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let name = kind.resource_name(config).to_string();

    lifecycle::delete_then_await_gone(&jobs, &name, config.delete_poll_interval).await?;

    info!("starting job '{name}'");
    let body = job(cr, config, kind, extra_args);
    let created = jobs.create(&PostParams::default(), &body).await?;

    let mut verdict = JobVerdict::FailedByExhaustion;
    let outcome = poll::await_condition(
        config.job_poll_interval,
        Budget::Attempts(config.job_poll_attempts),
        || async {
            let current = jobs.get(&name).await?;
            let status = current.status.unwrap_or_default();
            Ok::<_, Error>(classify(status.succeeded, status.failed).is_some())
        },
    )
    .await?;
    if outcome.satisfied() {
        let status = jobs.get(&name).await?.status.unwrap_or_default();
        if let Some(v) = classify(status.succeeded, status.failed) {
            verdict = v;
        }
    }

    match verdict {
        JobVerdict::Succeeded => {
            info!("job '{name}' succeeded");
            Ok(())
        }
        JobVerdict::FailedByStatus | JobVerdict::FailedByExhaustion => {
            let reason = match verdict {
                JobVerdict::FailedByExhaustion => "did not finish in time",
                _ => "failed",
            };
            let logs = collect_logs(client, namespace, &created).await;
            warn!("job '{name}' {reason}: {logs}");
            Err(reporter
                .fail(&format!("Job {name} {reason}. Pod logs: {logs}"))
                .await)
        }
    }
}

/// Logs of the job's pods, best effort. Log retrieval must never turn a job
/// failure report into a different error.
async fn collect_logs(client: &Client, namespace: &str, job: &Job) -> String {
    let Some(uid) = job.uid() else {
        return "<no job uid>".to_string();
    };
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("controller-uid={uid}"));
    let list = match pods.list(&lp).await {
        Ok(list) => list,
        Err(e) => return format!("<could not list pods: {e}>"),
    };
    let mut chunks = Vec::new();
    for pod in list {
        let pod_name = pod.name_any();
        match pods.logs(&pod_name, &LogParams::default()).await {
            Ok(text) => chunks.push(format!("{pod_name}: {text}")),
            Err(e) => chunks.push(format!("{pod_name}: <no logs: {e}>")),
        }
    }
    if chunks.is_empty() {
        "<no pods found>".to_string()
    } else {
        chunks.join("\n")
    }
}
