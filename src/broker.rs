use crate::errors::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info};

const MANAGEMENT_PORT: u16 = 15672;
const DEFAULT_VHOST: &str = "/";

/// Client for the broker's HTTP management API, used to provision the
/// messaging account and to purge stale topology when wiring changes.
pub struct BrokerAdmin {
    http: reqwest::Client,
    base_url: String,
    admin_user: String,
    admin_password: String,
}

#[derive(Deserialize)]
struct QueueInfo {
    name: String,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    durable: bool,
}

/// The vhost segment of management URLs; the default vhost is spelled `%2F`.
fn vhost_segment(vhost: &str) -> String {
    vhost.replace('/', "%2F")
}

/// Whether a queue belongs to this installation: named under the configured
/// prefix and carrying the service marker somewhere in its name.
pub fn is_managed_queue(name: &str, prefix: &str, marker: &str) -> bool {
    name.starts_with(prefix) && name.contains(marker)
}

impl BrokerAdmin {
    pub fn new(host: &str, admin_user: &str, admin_password: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{host}:{MANAGEMENT_PORT}/api"),
            admin_user: admin_user.to_string(),
            admin_password: admin_password.to_string(),
        }
    }

    async fn check(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Error::HttpError(format!(
                "{context}: broker management API returned {}",
                response.status()
            )))
        }
    }

    /// Create the vhost unless it is the default one, which always exists.
    pub async fn ensure_vhost(&self, vhost: &str) -> Result<()> {
        if vhost == DEFAULT_VHOST {
            debug!("default vhost requested, nothing to create");
            return Ok(());
        }
        let url = format!("{}/vhosts/{}", self.base_url, vhost_segment(vhost));
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.admin_user, Some(&self.admin_password))
            .send()
            .await?;
        self.check(response, "create vhost").await?;
        Ok(())
    }

    /// Create the service user unless it is the admin account itself.
    pub async fn ensure_user(&self, user: &str, password: &str) -> Result<()> {
        if user == self.admin_user {
            debug!("service user is the admin account, nothing to create");
            return Ok(());
        }
        let url = format!("{}/users/{user}", self.base_url);
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.admin_user, Some(&self.admin_password))
            .json(&serde_json::json!({"password": password, "tags": ""}))
            .send()
            .await?;
        self.check(response, "create user").await?;
        Ok(())
    }

    /// Grant the service user full permissions on the vhost. Skipped when
    /// both are the built-in defaults, which already carry them.
    pub async fn ensure_permissions(&self, vhost: &str, user: &str) -> Result<()> {
        if vhost == DEFAULT_VHOST && user == self.admin_user {
            return Ok(());
        }
        let url = format!(
            "{}/permissions/{}/{user}",
            self.base_url,
            vhost_segment(vhost)
        );
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.admin_user, Some(&self.admin_password))
            .json(&serde_json::json!({"configure": ".*", "write": ".*", "read": ".*"}))
            .send()
            .await?;
        self.check(response, "set permissions").await?;
        Ok(())
    }

    /// Durability of the service exchange; `None` when it does not exist.
    pub async fn exchange_durable(&self, vhost: &str, exchange: &str) -> Result<Option<bool>> {
        let url = format!(
            "{}/exchanges/{}/{exchange}",
            self.base_url,
            vhost_segment(vhost)
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.admin_user, Some(&self.admin_password))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let info: ExchangeInfo = self.check(response, "get exchange").await?.json().await?;
        Ok(Some(info.durable))
    }

    /// Delete every queue of this installation, then the service exchange,
    /// so the workload rebuilds its topology from scratch on next start.
    pub async fn purge_topology(&self, vhost: &str, prefix: &str, marker: &str, exchange: &str) -> Result<()> {
        let url = format!("{}/queues/{}", self.base_url, vhost_segment(vhost));
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.admin_user, Some(&self.admin_password))
            .send()
            .await?;
        let queues: Vec<QueueInfo> = self.check(response, "list queues").await?.json().await?;

        for queue in queues {
            if !is_managed_queue(&queue.name, prefix, marker) {
                continue;
            }
            info!("deleting queue '{}'", queue.name);
            let url = format!(
                "{}/queues/{}/{}",
                self.base_url,
                vhost_segment(vhost),
                queue.name
            );
            let response = self
                .http
                .delete(&url)
                .basic_auth(&self.admin_user, Some(&self.admin_password))
                .send()
                .await?;
            if response.status() != reqwest::StatusCode::NOT_FOUND {
                self.check(response, "delete queue").await?;
            }
        }

        info!("deleting exchange '{exchange}'");
        let url = format!(
            "{}/exchanges/{}/{exchange}",
            self.base_url,
            vhost_segment(vhost)
        );
        let response = self
            .http
            .delete(&url)
            .basic_auth(&self.admin_user, Some(&self.admin_password))
            .send()
            .await?;
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            self.check(response, "delete exchange").await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_queue_needs_prefix_and_marker() {
        assert!(is_managed_queue("site1_workflow_engine", "site1", "workflow"));
        assert!(is_managed_queue("workflow_engine", "", "workflow"));
        assert!(!is_managed_queue("site1_other_engine", "site1", "workflow"));
        assert!(!is_managed_queue("other_workflow_engine", "site1", "workflow"));
    }

    #[test]
    fn default_vhost_is_percent_encoded() {
        assert_eq!(vhost_segment("/"), "%2F");
        assert_eq!(vhost_segment("wf"), "wf");
    }
}
