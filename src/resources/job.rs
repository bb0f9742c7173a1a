use crate::api::{JobPodParams, WorkflowService};
use crate::config::OperatorConfig;

use super::deployment::workload_env;
use super::{labels, literal_env, owner_ref, requirements};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// One-shot jobs the operator runs to completion during reconcile passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Database schema migration, run before workloads on create and update.
    UpdateDb,
    /// Pre-deploy data cleanup, gated by `common.cleanup`.
    Cleanup,
    /// Disaster-recovery procedure, run on activation with the target mode
    /// as an argument.
    DisasterRecovery,
}

impl JobKind {
    pub fn resource_name(self, config: &OperatorConfig) -> &str {
        match self {
            JobKind::UpdateDb => &config.update_db_job,
            JobKind::Cleanup => &config.cleanup_job,
            JobKind::DisasterRecovery => &config.dr_job,
        }
    }

    fn command(self) -> &'static str {
        match self {
            JobKind::UpdateDb => "workflow-db-manage upgrade head",
            JobKind::Cleanup => "workflow-db-manage cleanup",
            JobKind::DisasterRecovery => "workflow-dr-run",
        }
    }

    fn params(self, cr: &WorkflowService) -> &JobPodParams {
        match self {
            JobKind::UpdateDb => &cr.spec.update_db_job,
            JobKind::Cleanup => &cr.spec.cleanup_job,
            JobKind::DisasterRecovery => &cr.spec.dr_job,
        }
    }
}

/// Job body for the given kind. Pod template shares the workload env so the
/// job sees the same database and broker wiring as the long-running roles.
/// Retries are capped so a stuck job surfaces as `failed == 3` rather than
/// crash-looping forever.
pub fn job(
    cr: &WorkflowService,
    config: &OperatorConfig,
    kind: JobKind,
    extra_args: &[String],
) -> Job {
    let spec = &cr.spec;
    let name = kind.resource_name(config).to_string();
    let labels = labels(spec, &name);
    let params = kind.params(cr);

    let mut command = kind.command().to_string();
    if let Some(args) = &params.args {
        command = format!("{command} {args}");
    }
    for arg in extra_args {
        command = format!("{command} {arg}");
    }

    let mut env = workload_env(config);
    if let Some(url) = &spec.common.external_url {
        env.push(literal_env("EXTERNAL_URL", url.clone()));
    }

    Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels.clone()),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name,
                        image: Some(spec.workflow.docker_image.clone()),
                        command: Some(vec![
                            "/bin/sh".to_string(),
                            "-c".to_string(),
                            command,
                        ]),
                        env: Some(env),
                        resources: Some(requirements("300m", &params.memory_limit)),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
