use crate::api::{WorkflowService, WorkflowServiceSpec};
use crate::config::OperatorConfig;

use super::deployment::workload_env;
use super::{labels, literal_env, owner_ref, profile, requirements};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const DEFAULT_BROKER_IMAGE: &str = "rabbitmq:3.12";

/// Combined single-process deployment for the lite topology. All roles run
/// in one container; an embedded broker container rides along when
/// `lite.includeLocalBroker` is set, reachable on localhost.
pub fn lite_deployment(cr: &WorkflowService, config: &OperatorConfig) -> Deployment {
    let spec: &WorkflowServiceSpec = &cr.spec;
    let profile = profile::derive(spec);
    let name = config.lite_deployment.clone();
    let labels = {
        let mut l = labels(spec, &name);
        l.insert("deploymentconfig".to_string(), name.clone());
        l
    };

    let mut env = workload_env(config);
    env.push(literal_env("SERVER", "All"));
    env.extend(profile.tls_env.clone());

    let main = spec.component_for("workflow-api").cloned().unwrap_or_default();
    let mut containers = vec![Container {
        name: name.clone(),
        image: Some(spec.workflow.docker_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: 8989,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/v2".to_string()),
                port: IntOrString::Int(8989),
                scheme: Some(profile.api_scheme.to_string()),
                ..Default::default()
            }),
            failure_threshold: Some(24),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            timeout_seconds: Some(10),
            ..Default::default()
        }),
        resources: Some(requirements(
            main.cpu.as_deref().unwrap_or("500m"),
            main.memory.as_deref().unwrap_or("1Gi"),
        )),
        ..Default::default()
    }];

    if spec.lite.include_local_broker {
        let image = spec
            .lite
            .broker_image
            .clone()
            .unwrap_or_else(|| DEFAULT_BROKER_IMAGE.to_string());
        containers.push(Container {
            name: "local-broker".to_string(),
            image: Some(image),
            ports: Some(vec![ContainerPort {
                container_port: 5672,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            readiness_probe: Some(Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::Int(5672),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(10),
                period_seconds: Some(5),
                ..Default::default()
            }),
            resources: Some(requirements("200m", "512Mi")),
            ..Default::default()
        });
    }

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(labels.clone()),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.lite.replicas.unwrap_or(1)),
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
                    containers,
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

    fn cr(include_local_broker: bool) -> WorkflowService {
        let spec = serde_json::from_value(serde_json::json!({
            "workflow": {"dockerImage": "registry.local/workflow:1.0", "liteEnabled": true},
            "common": {
                "auth": {"enable": false},
                "postgres": {"host": "pg", "port": "5432", "dbName": "workflow"},
                "broker": {"host": "broker", "port": "5672"},
            },
            "api": {}, "engine": {}, "executor": {}, "notifier": {}, "monitoring": {},
            "lite": {"includeLocalBroker": include_local_broker},
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
    fn single_container_without_local_broker() {
        let dep = lite_deployment(&cr(false), &OperatorConfig::default());
        let pod = dep.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 1);
        let env = pod.containers[0].env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "SERVER" && e.value.as_deref() == Some("All")));
    }

    #[test]
    fn local_broker_adds_sidecar() {
        let dep = lite_deployment(&cr(true), &OperatorConfig::default());
        let pod = dep.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[1].name, "local-broker");
        assert_eq!(
            pod.containers[1].image.as_deref(),
            Some(DEFAULT_BROKER_IMAGE)
        );
    }
}
