use crate::api::{WorkflowService, WorkflowServiceSpec};
use crate::config::OperatorConfig;

use super::{configmap_env, labels, literal_env, owner_ref, profile, requirements, secret_env};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::fmt;

/// Process role behind a per-role deployment of the multi-process topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Api,
    Engine,
    Executor,
    Notifier,
    Monitoring,
}

impl Role {
    pub fn from_deployment_name(name: &str) -> Option<Role> {
        match name {
            "workflow-api" => Some(Role::Api),
            "workflow-engine" => Some(Role::Engine),
            "workflow-executor" => Some(Role::Executor),
            "workflow-notifier" => Some(Role::Notifier),
            "workflow-monitoring" => Some(Role::Monitoring),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Role::Api => "Api",
            Role::Engine => "Engine",
            Role::Executor => "Executor",
            Role::Notifier => "Notifier",
            Role::Monitoring => "Monitoring",
        };
        f.write_str(name)
    }
}

/// Env wiring shared by every workload container and the one-shot jobs. All
/// runtime parameters come from the shared configmap and the primary secret
/// so the workload follows configmap updates without rebuilds.
pub fn workload_env(config: &OperatorConfig) -> Vec<EnvVar> {
    let secret = &config.primary_secret;
    let cm = &config.common_configmap;
    vec![
        secret_env("PG_USER", secret, "pg-user"),
        secret_env("PG_PASSWORD", secret, "pg-password"),
        secret_env("PG_ADMIN_USER", secret, "pg-admin-user"),
        secret_env("PG_ADMIN_PASSWORD", secret, "pg-admin-password"),
        configmap_env("PG_DB_NAME", cm, "pg-db-name"),
        configmap_env("PG_HOST", cm, "pg-host"),
        configmap_env("PG_PORT", cm, "pg-port"),
        secret_env("BROKER_USER", secret, "broker-user"),
        secret_env("BROKER_PASSWORD", secret, "broker-password"),
        secret_env("BROKER_ADMIN_USER", secret, "broker-admin-user"),
        secret_env("BROKER_ADMIN_PASSWORD", secret, "broker-admin-password"),
        configmap_env("BROKER_HOST", cm, "broker-host"),
        configmap_env("BROKER_PORT", cm, "broker-port"),
        configmap_env("BROKER_VHOST", cm, "broker-vhost"),
        configmap_env("QUEUE_NAME_PREFIX", cm, "queue-name-prefix"),
        configmap_env("AUTH_ENABLE", cm, "auth-enable"),
        configmap_env("AUTH_TYPE", cm, "auth-type"),
        configmap_env("MULTITENANCY_ENABLED", cm, "multitenancy-enabled"),
        configmap_env("GUARANTEED_NOTIFIER_ENABLED", cm, "guaranteed-notifier-enabled"),
        configmap_env("DEBUG_LOG", cm, "debug-log"),
    ]
}

fn readiness_probe(role: Role, api_scheme: &str, monitoring_scheme: &str) -> Probe {
    match role {
        Role::Api => Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/v2".to_string()),
                port: IntOrString::Int(8989),
                scheme: Some(api_scheme.to_string()),
                ..Default::default()
            }),
            failure_threshold: Some(24),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            timeout_seconds: Some(10),
            ..Default::default()
        },
        Role::Monitoring => Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".to_string()),
                port: IntOrString::Int(9090),
                scheme: Some(monitoring_scheme.to_string()),
                ..Default::default()
            }),
            failure_threshold: Some(24),
            initial_delay_seconds: Some(10),
            period_seconds: Some(120),
            timeout_seconds: Some(10),
            ..Default::default()
        },
        _ => Probe {
            exec: Some(ExecAction {
                command: Some(vec!["echo".to_string(), "ready".to_string()]),
            }),
            failure_threshold: Some(30),
            initial_delay_seconds: Some(60),
            period_seconds: Some(5),
            timeout_seconds: Some(20),
            ..Default::default()
        },
    }
}

/// Per-role deployment of the multi-process topology.
pub fn role_deployment(
    cr: &WorkflowService,
    config: &OperatorConfig,
    name: &str,
    role: Role,
) -> Deployment {
    let spec = &cr.spec;
    let profile = profile::derive(spec);
    let component = spec.component_for(name).cloned().unwrap_or_default();
    let labels = {
        let mut l = labels(spec, name);
        l.insert("deploymentconfig".to_string(), name.to_string());
        l
    };

    let mut env = workload_env(config);
    env.push(literal_env("SERVER", role.to_string()));
    env.extend(profile.tls_env.clone());

    let ports = match role {
        Role::Api => vec![ContainerPort {
            container_port: 8989,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }],
        Role::Monitoring => vec![ContainerPort {
            container_port: 9090,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }],
        _ => Vec::new(),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(component.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(spec.workflow.docker_image.clone()),
                        image_pull_policy: Some("Always".to_string()),
                        env: Some(env),
                        ports: Some(ports),
                        readiness_probe: Some(readiness_probe(
                            role,
                            profile.api_scheme,
                            profile.monitoring_scheme,
                        )),
                        resources: Some(requirements(
                            component.cpu.as_deref().unwrap_or("250m"),
                            component.memory.as_deref().unwrap_or("512Mi"),
                        )),
                        ..Default::default()
                    }],
                    priority_class_name: component.priority_class_name.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single-replica deployment running the integration-test workload. The
/// workload publishes its terminal result as a condition on the operator's
/// own deployment status.
pub fn tests_deployment(cr: &WorkflowService, config: &OperatorConfig) -> Deployment {
    let spec: &WorkflowServiceSpec = &cr.spec;
    let profile = profile::derive(spec);
    let name = config.tests_deployment.clone();
    let labels = labels(spec, &name);
    let scheme = profile.api_scheme.to_lowercase();

    let image = spec
        .integration_tests
        .docker_image
        .clone()
        .unwrap_or_else(|| spec.workflow.docker_image.clone());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels.clone()),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name,
                        image: Some(image),
                        env: Some(vec![
                            literal_env(
                                "TARGET_URL",
                                format!("{}://{}:8989/v2", scheme, config.api_service),
                            ),
                            literal_env("STATUS_DEPLOYMENT", config.operator_deployment.clone()),
                            literal_env(
                                "RUN_BENCHMARKS",
                                spec.integration_tests.run_benchmarks.to_string(),
                            ),
                        ]),
                        resources: Some(requirements("300m", "300Mi")),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cr() -> WorkflowService {
        let spec = serde_json::from_value(serde_json::json!({
            "workflow": {"dockerImage": "registry.local/workflow:1.0"},
            "common": {
                "auth": {"enable": false},
                "postgres": {"host": "pg", "port": "5432", "dbName": "workflow"},
                "broker": {"host": "broker", "port": "5672"},
            },
            "api": {"replicas": 3, "cpu": "500m"},
            "engine": {}, "executor": {}, "notifier": {}, "monitoring": {},
        }))
        .unwrap();
        WorkflowService {
            metadata: ObjectMeta {
                name: Some("workflow-service".into()),
                namespace: Some("default".into()),
                uid: Some("abc-123".into()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn api_deployment_carries_replicas_and_probe_scheme() {
        let config = OperatorConfig::default();
        let dep = role_deployment(&cr(), &config, "workflow-api", Role::Api);
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let container = &spec.template.spec.unwrap().containers[0];
        let probe = container.readiness_probe.as_ref().unwrap();
        assert_eq!(
            probe.http_get.as_ref().unwrap().scheme.as_deref(),
            Some("HTTP")
        );
        let env_names: Vec<&str> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert!(env_names.contains(&"SERVER"));
        assert!(env_names.contains(&"BROKER_VHOST"));
    }

    #[test]
    fn deployments_are_adopted() {
        let config = OperatorConfig::default();
        let dep = role_deployment(&cr(), &config, "workflow-engine", Role::Engine);
        let orefs = dep.metadata.owner_references.unwrap();
        assert_eq!(orefs[0].kind, "WorkflowService");
        assert_eq!(orefs[0].name, "workflow-service");
    }

    #[test]
    fn builders_are_deterministic() {
        let config = OperatorConfig::default();
        let a = role_deployment(&cr(), &config, "workflow-api", Role::Api);
        let b = role_deployment(&cr(), &config, "workflow-api", Role::Api);
        assert_json_diff::assert_json_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }
}
