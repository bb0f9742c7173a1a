use crate::api::{
    ConditionType, DisasterRecoveryStatus, StatusCondition, WorkflowService, WorkflowServiceStatus,
};
use crate::config::OperatorConfig;
use crate::errors::{Error, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use tokio::time::sleep;
use tracing::info;

pub const STATUS_FIELD_MANAGER: &str = "workflow-operator-status";

/// Writes lifecycle conditions to the CR status sub-resource — the only
/// observability channel back to the cluster operator. Status is re-read
/// before every patch; nothing is cached across passes.
pub struct StatusReporter<'a> {
    api: Api<WorkflowService>,
    name: String,
    config: &'a OperatorConfig,
}

/// Append a condition to the history, never rewriting previous entries.
pub fn append_condition(
    mut conditions: Vec<StatusCondition>,
    type_: ConditionType,
    error: Option<&str>,
    message: &str,
) -> Vec<StatusCondition> {
    conditions.push(StatusCondition {
        type_: type_.to_string(),
        status: "True".to_string(),
        message: message.to_string(),
        error: error.map(str::to_string),
        timestamp: chrono::Utc::now().to_rfc3339(),
    });
    conditions
}

impl<'a> StatusReporter<'a> {
    pub fn new(client: &Client, namespace: &str, name: &str, config: &'a OperatorConfig) -> Self {
        Self {
            api: Api::namespaced(client.clone(), namespace),
            name: name.to_string(),
            config,
        }
    }

    async fn current_status(&self) -> Result<WorkflowServiceStatus> {
        let cr = self.api.get(&self.name).await?;
        Ok(cr.status.unwrap_or_default())
    }

    async fn patch_status(&self, status: &WorkflowServiceStatus) -> Result<()> {
        let patch = Patch::Merge(serde_json::json!({ "status": status }));
        self.api
            .patch_status(&self.name, &PatchParams::apply(STATUS_FIELD_MANAGER), &patch)
            .await?;
        Ok(())
    }

    /// Reset the condition log and start a new deploy cycle.
    pub async fn initiate(&self, message: &str) -> Result<()> {
        let mut status = self.current_status().await?;
        status.conditions = append_condition(Vec::new(), ConditionType::InProgress, None, message);
        self.patch_status(&status).await
    }

    /// Append a condition to the history.
    pub async fn report(
        &self,
        type_: ConditionType,
        error: Option<&str>,
        message: &str,
    ) -> Result<()> {
        let mut status = self.current_status().await?;
        status.conditions = append_condition(status.conditions, type_, error, message);
        self.patch_status(&status).await
    }

    /// Terminal failure: write the Failed condition, give the patch time to
    /// propagate, then hand back a non-retryable error.
    pub async fn fail(&self, message: &str) -> Error {
        if let Err(e) = self.report(ConditionType::Failed, Some("Error"), message).await {
            info!("could not write Failed condition: {e}");
        }
        sleep(self.config.status_propagation_delay).await;
        Error::Fatal(message.to_string())
    }

    /// Overwrite the disaster-recovery record; the condition log is untouched.
    pub async fn set_disaster_recovery(
        &self,
        mode: &str,
        status: &str,
        message: Option<&str>,
    ) -> Result<()> {
        let mut current = self.current_status().await?;
        current.disaster_recovery_status = Some(DisasterRecoveryStatus {
            mode: mode.to_string(),
            status: status.to_string(),
            message: message.map(str::to_string),
        });
        self.patch_status(&current).await
    }

    /// Previously recorded disaster-recovery mode, read fresh from the CR so
    /// a restarted operator picks up a half-finished switchover.
    pub async fn recorded_dr_mode(&self) -> Result<Option<String>> {
        let status = self.current_status().await?;
        Ok(status.disaster_recovery_status.map(|s| s.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mock_client, timeout_after_1s, Scenario};

    #[tokio::test]
    async fn initiate_reads_then_patches_the_status_subresource() {
        let (client, verifier) = mock_client();
        let config = OperatorConfig::test();
        let reporter = StatusReporter::new(&client, "default", "workflow-service", &config);
        let scenario = verifier.run(Scenario::StatusPatch(WorkflowService::test()));
        reporter.initiate("Deploy started").await.unwrap();
        timeout_after_1s(scenario).await;
    }

    #[test]
    fn append_keeps_history_in_order() {
        let conditions = append_condition(Vec::new(), ConditionType::InProgress, None, "started");
        let conditions = append_condition(conditions, ConditionType::Failed, Some("Error"), "boom");
        let conditions =
            append_condition(conditions, ConditionType::Successful, None, "recovered");
        let types: Vec<&str> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec!["In Progress", "Failed", "Successful"]);
        assert_eq!(conditions[1].error.as_deref(), Some("Error"));
        assert!(conditions.iter().all(|c| c.status == "True"));
    }
}
