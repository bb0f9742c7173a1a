use crate::api::WorkflowServiceSpec;
use k8s_openapi::api::core::v1::EnvVar;

use super::literal_env;

/// Field set derived from the topology × TLS × auth decision table. Pure so
/// the table is testable without building full manifests.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentProfile {
    /// Probe and service URL scheme for the API role.
    pub api_scheme: &'static str,
    pub monitoring_scheme: &'static str,
    /// Broker endpoint the workload should talk to; lite topology with an
    /// embedded broker pins this to localhost.
    pub broker_host: String,
    pub broker_vhost: String,
    pub auth_enabled: bool,
    pub tls_env: Vec<EnvVar>,
}

pub fn derive(spec: &WorkflowServiceSpec) -> DeploymentProfile {
    let tls = &spec.workflow.tls;
    let api_scheme = if tls.enabled && tls.services.api.enabled {
        "HTTPS"
    } else {
        "HTTP"
    };
    let monitoring_scheme = if tls.enabled && tls.services.monitoring.enabled {
        "HTTPS"
    } else {
        "HTTP"
    };

    let local_broker = spec.workflow.lite_enabled && spec.lite.include_local_broker;
    let (broker_host, broker_vhost) = if local_broker {
        ("localhost".to_string(), "/".to_string())
    } else {
        (
            spec.common.broker.host.clone(),
            spec.common.broker.vhost.clone(),
        )
    };

    let tls_env = if tls.enabled {
        vec![
            literal_env("WORKFLOW_TLS_ENABLED", tls.services.api.enabled.to_string()),
            literal_env(
                "WORKFLOW_MONITORING_TLS_ENABLED",
                tls.services.monitoring.enabled.to_string(),
            ),
            literal_env("BROKER_TLS_ENABLED", tls.services.broker.enabled.to_string()),
            literal_env("PGSSLMODE", tls.services.postgres.sslmode.clone()),
        ]
    } else {
        Vec::new()
    };

    DeploymentProfile {
        api_scheme,
        monitoring_scheme,
        broker_host,
        broker_vhost,
        auth_enabled: spec.common.auth.enable,
        tls_env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::*;

    fn base_spec() -> WorkflowServiceSpec {
        serde_json::from_value(serde_json::json!({
            "workflow": {"dockerImage": "registry.local/workflow:1.0"},
            "common": {
                "auth": {"enable": true, "type": "jwk"},
                "postgres": {"host": "pg", "port": "5432", "dbName": "workflow"},
                "broker": {"host": "broker", "port": "5672", "vhost": "wf"},
            },
            "api": {}, "engine": {}, "executor": {}, "notifier": {}, "monitoring": {},
        }))
        .unwrap()
    }

    #[test]
    fn plain_http_without_tls() {
        let profile = derive(&base_spec());
        assert_eq!(profile.api_scheme, "HTTP");
        assert_eq!(profile.monitoring_scheme, "HTTP");
        assert!(profile.tls_env.is_empty());
        assert!(profile.auth_enabled);
        assert_eq!(profile.broker_host, "broker");
        assert_eq!(profile.broker_vhost, "wf");
    }

    #[test]
    fn per_service_tls_drives_schemes_independently() {
        let mut spec = base_spec();
        spec.workflow.tls = TlsSpec {
            enabled: true,
            services: TlsServices {
                api: TlsToggle { enabled: true },
                monitoring: TlsToggle { enabled: false },
                broker: TlsToggle { enabled: true },
                postgres: PostgresTls {
                    sslmode: "require".into(),
                },
            },
        };
        let profile = derive(&spec);
        assert_eq!(profile.api_scheme, "HTTPS");
        assert_eq!(profile.monitoring_scheme, "HTTP");
        let names: Vec<&str> = profile.tls_env.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"PGSSLMODE"));
    }

    #[test]
    fn tls_flag_without_global_enable_stays_http() {
        let mut spec = base_spec();
        spec.workflow.tls.services.api.enabled = true;
        assert_eq!(derive(&spec).api_scheme, "HTTP");
    }

    #[test]
    fn embedded_local_broker_overrides_endpoint() {
        let mut spec = base_spec();
        spec.workflow.lite_enabled = true;
        spec.lite.include_local_broker = true;
        let profile = derive(&spec);
        assert_eq!(profile.broker_host, "localhost");
        assert_eq!(profile.broker_vhost, "/");
    }
}
