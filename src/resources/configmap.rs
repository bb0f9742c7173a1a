use crate::api::{WorkflowService, WorkflowServiceSpec};
use crate::config::OperatorConfig;

use super::{labels, owner_ref, profile};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Key/value payload of the shared parameters configmap. Pure so the
/// spec-to-configmap mapping is testable without a cluster.
pub fn common_params(spec: &WorkflowServiceSpec) -> BTreeMap<String, String> {
    let profile = profile::derive(spec);
    let auth = &spec.common.auth;
    let mut data = BTreeMap::from([
        ("pg-host".to_string(), spec.common.postgres.host.clone()),
        ("pg-port".to_string(), spec.common.postgres.port.clone()),
        ("pg-db-name".to_string(), spec.common.postgres.db_name.clone()),
        ("broker-host".to_string(), profile.broker_host),
        ("broker-port".to_string(), spec.common.broker.port.clone()),
        ("broker-vhost".to_string(), profile.broker_vhost),
        (
            "queue-name-prefix".to_string(),
            spec.common.queue_name_prefix.clone(),
        ),
        ("auth-enable".to_string(), auth.enable.to_string()),
        ("auth-type".to_string(), auth.auth_type.clone()),
        (
            "multitenancy-enabled".to_string(),
            spec.common.multitenancy_enabled.to_string(),
        ),
        (
            "guaranteed-notifier-enabled".to_string(),
            spec.common.guaranteed_notifier_enabled.to_string(),
        ),
        ("debug-log".to_string(), spec.common.debug_log.to_string()),
    ]);
    if let Some(server) = &auth.idp_server {
        data.insert("idp-server".to_string(), server.clone());
    }
    if let Some(server) = &auth.idp_external_server {
        data.insert("idp-external-server".to_string(), server.clone());
    }
    if let Some(url) = &spec.common.external_url {
        data.insert("external-url".to_string(), url.clone());
    }
    data
}

pub fn common_configmap(cr: &WorkflowService, config: &OperatorConfig) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config.common_configmap.clone()),
            labels: Some(labels(&cr.spec, &config.common_configmap)),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(common_params(&cr.spec)),
        ..Default::default()
    }
}

/// Configuration mounted into the embedded local broker of the lite
/// topology. Guest access is confined to localhost by the broker itself, so
/// the loopback-only listener is all we pin down here.
pub fn broker_configmap(cr: &WorkflowService, config: &OperatorConfig) -> ConfigMap {
    let conf = "listeners.tcp.local = 127.0.0.1:5672\nloopback_users.guest = true\n";
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config.broker_configmap.clone()),
            labels: Some(labels(&cr.spec, &config.broker_configmap)),
            owner_references: owner_ref(cr).map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "rabbitmq.conf".to_string(),
            conf.to_string(),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(local_broker: bool) -> WorkflowServiceSpec {
        serde_json::from_value(serde_json::json!({
            "workflow": {"dockerImage": "registry.local/workflow:1.0", "liteEnabled": local_broker},
            "common": {
                "auth": {"enable": true, "type": "keycloak-oidc", "idpServer": "https://idp.local"},
                "postgres": {"host": "pg", "port": "5432", "dbName": "workflow"},
                "broker": {"host": "broker", "port": "5672", "vhost": "wf"},
                "queueNamePrefix": "site1",
            },
            "api": {}, "engine": {}, "executor": {}, "notifier": {}, "monitoring": {},
            "lite": {"includeLocalBroker": local_broker},
        }))
        .unwrap()
    }

    #[test]
    fn params_reflect_spec() {
        let data = common_params(&spec(false));
        assert_eq!(data["broker-host"], "broker");
        assert_eq!(data["broker-vhost"], "wf");
        assert_eq!(data["queue-name-prefix"], "site1");
        assert_eq!(data["auth-enable"], "true");
        assert_eq!(data["auth-type"], "keycloak-oidc");
        assert_eq!(data["idp-server"], "https://idp.local");
    }

    #[test]
    fn local_broker_rewrites_endpoint_keys() {
        let data = common_params(&spec(true));
        assert_eq!(data["broker-host"], "localhost");
        assert_eq!(data["broker-vhost"], "/");
    }
}
