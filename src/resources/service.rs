use crate::api::WorkflowService;
use crate::config::OperatorConfig;

use super::{labels, owner_ref};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

fn service(cr: &WorkflowService, name: &str, selector_app: &str, port: i32) -> Service {
    let labels = labels(&cr.spec, name);
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                "app".to_string(),
                selector_app.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// API service. In the lite topology it selects the combined deployment,
/// otherwise the api role.
pub fn api_service(cr: &WorkflowService, config: &OperatorConfig) -> Service {
    let selector = if cr.spec.workflow.lite_enabled {
        config.lite_deployment.as_str()
    } else {
        "workflow-api"
    };
    service(cr, &config.api_service, selector, 8989)
}

pub fn monitoring_service(cr: &WorkflowService, config: &OperatorConfig) -> Service {
    service(cr, &config.monitoring_service, "workflow-monitoring", 9090)
}

/// Service fronting the integration-test workload, created and removed
/// together with the tests deployment.
pub fn tests_service(cr: &WorkflowService, config: &OperatorConfig) -> Service {
    service(cr, &config.tests_deployment, &config.tests_deployment, 8989)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cr(lite: bool) -> WorkflowService {
        let spec = serde_json::from_value(serde_json::json!({
            "workflow": {"dockerImage": "registry.local/workflow:1.0", "liteEnabled": lite},
            "common": {
                "auth": {"enable": false},
                "postgres": {"host": "pg", "port": "5432", "dbName": "workflow"},
                "broker": {"host": "broker", "port": "5672"},
            },
            "api": {}, "engine": {}, "executor": {}, "notifier": {}, "monitoring": {},
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
    fn api_service_selector_follows_topology() {
        let config = OperatorConfig::default();
        let per_role = api_service(&cr(false), &config);
        let selector = per_role.spec.unwrap().selector.unwrap();
        assert_eq!(selector["app"], "workflow-api");

        let lite = api_service(&cr(true), &config);
        let selector = lite.spec.unwrap().selector.unwrap();
        assert_eq!(selector["app"], "workflow");
    }

    #[test]
    fn monitoring_service_exposes_9090() {
        let svc = monitoring_service(&cr(false), &OperatorConfig::default());
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 9090);
    }

    #[test]
    fn tests_service_selects_the_test_workload() {
        let svc = tests_service(&cr(false), &OperatorConfig::default());
        assert_eq!(svc.metadata.name.as_deref(), Some("workflow-tests"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector.unwrap()["app"], "workflow-tests");
        assert_eq!(spec.ports.unwrap()[0].port, 8989);
    }
}
