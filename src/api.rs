use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub static WORKFLOW_SERVICE_FINALIZER: &str = "workflowservice.workflows.arcadia.dev";

/// Annotation holding the spec as last handled by the operator; diffs for
/// update classification are computed against it so they survive restarts.
pub static LAST_HANDLED_ANNOTATION: &str = "workflows.arcadia.dev/last-handled-spec";

/// Generate the Kubernetes wrapper struct `WorkflowService` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "WorkflowService",
    group = "workflows.arcadia.dev",
    version = "v2",
    namespaced
)]
#[kube(status = "WorkflowServiceStatus", shortname = "wfs")]
#[serde(rename_all = "camelCase")]
pub struct WorkflowServiceSpec {
    /// Identity of the operator generation allowed to reconcile this CR.
    #[serde(default)]
    pub operator_id: Option<String>,

    pub workflow: WorkflowSettings,
    pub common: CommonParams,

    pub api: ComponentSpec,
    pub engine: ComponentSpec,
    pub executor: ComponentSpec,
    pub notifier: ComponentSpec,
    pub monitoring: ComponentSpec,

    #[serde(default)]
    pub lite: LiteSpec,

    #[serde(default)]
    pub update_db_job: JobPodParams,
    #[serde(default)]
    pub cleanup_job: JobPodParams,
    #[serde(default)]
    pub dr_job: JobPodParams,

    #[serde(default)]
    pub integration_tests: IntegrationTestsSpec,

    #[serde(default)]
    pub disaster_recovery: Option<DisasterRecoverySpec>,

    /// Extra labels stamped onto every managed resource.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    pub docker_image: String,
    /// Single combined-process deployment instead of per-role deployments.
    #[serde(default)]
    pub lite_enabled: bool,
    /// External identity broker manages the service account; the operator
    /// only rotates a local random secret when the upstream username changes.
    #[serde(default)]
    pub identity_broker_enabled: bool,
    #[serde(default)]
    pub tls: TlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub services: TlsServices,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsServices {
    #[serde(default)]
    pub api: TlsToggle,
    #[serde(default)]
    pub monitoring: TlsToggle,
    #[serde(default)]
    pub broker: TlsToggle,
    #[serde(default)]
    pub postgres: PostgresTls,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct TlsToggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct PostgresTls {
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

impl Default for PostgresTls {
    fn default() -> Self {
        Self {
            sslmode: default_sslmode(),
        }
    }
}

fn default_sslmode() -> String {
    "prefer".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[serde(rename_all = "camelCase")]
pub struct CommonParams {
    pub auth: AuthParams,
    pub postgres: PostgresParams,
    pub broker: BrokerParams,
    #[serde(default = "default_queue_prefix")]
    pub queue_name_prefix: String,
    /// Run the pre-deploy cleanup job on the create path.
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub multitenancy_enabled: bool,
    #[serde(default)]
    pub guaranteed_notifier_enabled: bool,
    #[serde(default)]
    pub debug_log: bool,
    #[serde(default)]
    pub external_url: Option<String>,
}

fn default_queue_prefix() -> String {
    String::new()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthParams {
    #[serde(default)]
    pub enable: bool,
    /// "keycloak-oidc" selects the realm certs discovery endpoint, anything
    /// else the generic JWK endpoint.
    #[serde(rename = "type", default)]
    pub auth_type: String,
    #[serde(default)]
    pub idp_server: Option<String>,
    #[serde(default)]
    pub idp_external_server: Option<String>,
    /// Client credentials exist under a fixed name; skip generation.
    #[serde(default)]
    pub idp_user_precreated: bool,
    /// Username requested from the external identity broker; defaults to
    /// `<namespace>_workflow`.
    #[serde(default)]
    pub identity_username: Option<String>,
}

impl AuthParams {
    /// Identity-provider endpoint for JWK discovery and client registration.
    /// The externally reachable server wins when both are configured.
    pub fn idp_endpoint(&self) -> Option<&str> {
        self.idp_external_server
            .as_deref()
            .or(self.idp_server.as_deref())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresParams {
    pub host: String,
    pub port: String,
    pub db_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerParams {
    pub host: String,
    pub port: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
}

pub fn default_vhost() -> String {
    "/".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub priority_class_name: Option<String>,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            cpu: None,
            memory: None,
            priority_class_name: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiteSpec {
    /// Embed a local broker container into the combined deployment.
    #[serde(default)]
    pub include_local_broker: bool,
    #[serde(default)]
    pub broker_image: Option<String>,
    #[serde(default)]
    pub replicas: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobPodParams {
    #[serde(default = "default_job_memory")]
    pub memory_limit: String,
    #[serde(default)]
    pub args: Option<String>,
}

impl Default for JobPodParams {
    fn default() -> Self {
        Self {
            memory_limit: default_job_memory(),
            args: None,
        }
    }
}

fn default_job_memory() -> String {
    "300Mi".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTestsSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub run_tests_only: bool,
    /// Block the reconcile pass on the test result instead of watching it in
    /// the background.
    #[serde(default)]
    pub wait_test_result_on_job: bool,
    #[serde(default)]
    pub run_benchmarks: bool,
    #[serde(default)]
    pub docker_image: Option<String>,
    /// Seconds to wait for every managed deployment to become ready.
    #[serde(default = "default_ready_timeout")]
    pub service_ready_timeout: u64,
    /// Seconds to wait for the test workload to surface a terminal result.
    #[serde(default = "default_test_result_timeout")]
    pub wait_test_result_timeout: u64,
}

// The serde field defaults must survive the whole block being absent too.
impl Default for IntegrationTestsSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            run_tests_only: false,
            wait_test_result_on_job: false,
            run_benchmarks: false,
            docker_image: None,
            service_ready_timeout: default_ready_timeout(),
            wait_test_result_timeout: default_test_result_timeout(),
        }
    }
}

fn default_ready_timeout() -> u64 {
    300
}

fn default_test_result_timeout() -> u64 {
    900
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoverySpec {
    pub mode: Option<String>,
    #[serde(default)]
    pub no_wait: bool,
}

/// The status object of `WorkflowService`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowServiceStatus {
    /// Append-only deployment history, oldest first.
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
    #[serde(default)]
    pub disaster_recovery_status: Option<DisasterRecoveryStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoveryStatus {
    pub mode: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionType {
    InProgress,
    Successful,
    Failed,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConditionType::InProgress => write!(f, "In Progress"),
            ConditionType::Successful => write!(f, "Successful"),
            ConditionType::Failed => write!(f, "Failed"),
        }
    }
}

/// Disaster-recovery role requested through `spec.disasterRecovery.mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrMode {
    Standby,
    Disable,
    Active,
}

impl DrMode {
    pub fn parse(s: &str) -> Option<DrMode> {
        match s {
            "standby" => Some(DrMode::Standby),
            "disable" => Some(DrMode::Disable),
            "active" => Some(DrMode::Active),
            _ => None,
        }
    }
}

impl fmt::Display for DrMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DrMode::Standby => write!(f, "standby"),
            DrMode::Disable => write!(f, "disable"),
            DrMode::Active => write!(f, "active"),
        }
    }
}

impl WorkflowServiceSpec {
    /// Replica count configured for a per-role deployment, by resource name.
    pub fn replicas_for(&self, deployment: &str) -> i32 {
        match deployment {
            "workflow-api" => self.api.replicas,
            "workflow-engine" => self.engine.replicas,
            "workflow-executor" => self.executor.replicas,
            "workflow-notifier" => self.notifier.replicas,
            "workflow-monitoring" => self.monitoring.replicas,
            _ => 1,
        }
    }

    pub fn component_for(&self, deployment: &str) -> Option<&ComponentSpec> {
        match deployment {
            "workflow-api" => Some(&self.api),
            "workflow-engine" => Some(&self.engine),
            "workflow-executor" => Some(&self.executor),
            "workflow-notifier" => Some(&self.notifier),
            "workflow-monitoring" => Some(&self.monitoring),
            _ => None,
        }
    }
}
