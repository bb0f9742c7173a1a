use std::env;
use tokio::time::Duration;

/// Immutable operator configuration, shared through the reconciler context.
///
/// Resource names and poll budgets live here rather than in scattered
/// constants so tests can shrink the waits to milliseconds.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Identity of this operator generation, compared against
    /// `spec.operatorId` to detect a newer deployment claiming the CR.
    pub operator_id: String,
    /// Whether CR deletion tears down owned resources or only logs.
    pub delete_resources: bool,
    /// PEM bundle used to verify the identity provider endpoint, if present.
    pub idp_ca_bundle: Option<String>,

    pub primary_secret: String,
    pub tls_secret: String,
    pub client_credentials_secret: String,
    pub common_configmap: String,
    pub custom_configmap: String,
    pub broker_configmap: String,
    pub update_db_job: String,
    pub cleanup_job: String,
    pub dr_job: String,
    pub tests_deployment: String,
    pub lite_deployment: String,
    pub api_service: String,
    pub monitoring_service: String,
    pub operator_deployment: String,
    pub exchange_name: String,
    pub queue_marker: String,

    /// Per-role deployments of the multi-process topology, in the order they
    /// are reconciled and scaled.
    pub managed_deployments: Vec<String>,

    pub job_poll_interval: Duration,
    pub job_poll_attempts: u32,
    pub delete_poll_interval: Duration,
    pub scale_poll_interval: Duration,
    pub scale_down_attempts: u32,
    pub scale_up_attempts: u32,
    pub ready_check_interval: Duration,
    pub test_poll_interval: Duration,
    /// Pause after writing a Failed condition so the status patch propagates
    /// before the reconcile pass errors out.
    pub status_propagation_delay: Duration,
    /// Back-off when a newer operator generation owns the CR.
    pub takeover_backoff: Duration,
    /// Settle time after deleting the combined lite deployment.
    pub lite_delete_settle: Duration,
    pub tests_recreate_settle: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_id: String::new(),
            delete_resources: false,
            idp_ca_bundle: None,
            primary_secret: "workflow-secret".into(),
            tls_secret: "workflow-tls-secret".into(),
            client_credentials_secret: "workflow-client-credentials".into(),
            common_configmap: "workflow-common-params".into(),
            custom_configmap: "custom-workflow-conf".into(),
            broker_configmap: "broker-config".into(),
            update_db_job: "workflow-update-db".into(),
            cleanup_job: "workflow-cleanup-job".into(),
            dr_job: "workflow-dr".into(),
            tests_deployment: "workflow-tests".into(),
            lite_deployment: "workflow".into(),
            api_service: "workflow".into(),
            monitoring_service: "workflow-monitoring".into(),
            operator_deployment: "workflow-operator".into(),
            exchange_name: "workflow".into(),
            queue_marker: "workflow".into(),
            managed_deployments: vec![
                "workflow-api".into(),
                "workflow-notifier".into(),
                "workflow-executor".into(),
                "workflow-monitoring".into(),
                "workflow-engine".into(),
            ],
            job_poll_interval: Duration::from_secs(20),
            job_poll_attempts: 36,
            delete_poll_interval: Duration::from_secs(3),
            scale_poll_interval: Duration::from_secs(10),
            scale_down_attempts: 6,
            scale_up_attempts: 12,
            ready_check_interval: Duration::from_secs(5),
            test_poll_interval: Duration::from_secs(5),
            status_propagation_delay: Duration::from_secs(5),
            takeover_backoff: Duration::from_secs(90),
            lite_delete_settle: Duration::from_secs(90),
            tests_recreate_settle: Duration::from_secs(5),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        let truthy = |v: &str| matches!(v, "true" | "True" | "yes" | "Yes");
        Self {
            operator_id: env::var("OPERATOR_ID").unwrap_or_default(),
            delete_resources: env::var("OPERATOR_DELETE_RESOURCES")
                .map(|v| truthy(&v))
                .unwrap_or(false),
            idp_ca_bundle: env::var("IDP_CA_BUNDLE").ok(),
            ..Self::default()
        }
    }

    /// Configuration with all waits collapsed for unit tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            job_poll_interval: Duration::from_millis(1),
            delete_poll_interval: Duration::from_millis(1),
            scale_poll_interval: Duration::from_millis(1),
            ready_check_interval: Duration::from_millis(1),
            test_poll_interval: Duration::from_millis(1),
            status_propagation_delay: Duration::from_millis(1),
            takeover_backoff: Duration::from_millis(1),
            lite_delete_settle: Duration::from_millis(1),
            tests_recreate_settle: Duration::from_millis(1),
            ..Self::default()
        }
    }
}
