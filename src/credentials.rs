use crate::api::WorkflowServiceSpec;
use crate::config::OperatorConfig;
use crate::errors::Result;
use crate::idp::IdpClient;
use crate::status::StatusReporter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::client::Client;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info};

const GENERATED_PASSWORD_LEN: usize = 64;

/// How recently another actor must have touched a secret for the operator
/// to treat it as freshly rotated and leave it alone.
const SECRET_FRESHNESS_SECS: i64 = 180;

/// Whether a stored credential value requires generation: absent, empty and
/// the literal string "null" are all sentinels left by the install pipeline.
pub fn needs_generation(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.is_empty() || v == "null",
    }
}

pub fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Decoded string value of a secret key, if present and valid UTF-8.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    let bytes = secret.data.as_ref()?.get(key)?;
    String::from_utf8(bytes.0.clone()).ok()
}

/// Like [`secret_value`], but a generation sentinel counts as missing. Used
/// where a value must be consumed as-is, never regenerated.
fn usable_secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret_value(secret, key).filter(|v| !needs_generation(Some(v)))
}

/// Broker credentials secret for identity-broker mode, materialized by the
/// operator when the external broker has not created it yet. The m2m label
/// marks the account for machine-to-machine handling upstream.
pub fn identity_broker_secret(name: &str, username: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([("m2m".to_string(), "enabled".to_string())])),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([
            ("username".to_string(), username.to_string()),
            ("password".to_string(), random_password()),
        ])),
        ..Default::default()
    }
}

/// Whether any field manager touched the secret within the freshness window.
/// Used to avoid clobbering a rotation that is still propagating.
pub fn is_recently_updated(secret: &Secret, now: DateTime<Utc>) -> bool {
    let Some(managed) = &secret.metadata.managed_fields else {
        return false;
    };
    managed.iter().any(|entry| {
        entry
            .time
            .as_ref()
            .map(|t| now - t.0 < ChronoDuration::seconds(SECRET_FRESHNESS_SECS))
            .unwrap_or(false)
    })
}

async fn patch_secret_values(
    api: &Api<Secret>,
    name: &str,
    values: serde_json::Value,
) -> Result<()> {
    let patch = Patch::Merge(serde_json::json!({"stringData": values}));
    api.patch(name, &PatchParams::default(), &patch).await?;
    Ok(())
}

/// Provisions credentials the workload needs before it can start: the
/// identity provider's signing keys, an IDP client and the messaging
/// account's vhost, user and permissions.
pub struct CredentialProvisioner<'a> {
    secrets: Api<Secret>,
    idp: IdpClient,
    config: &'a OperatorConfig,
}

impl<'a> CredentialProvisioner<'a> {
    pub fn new(client: &Client, namespace: &str, config: &'a OperatorConfig) -> Result<Self> {
        Ok(Self {
            secrets: Api::namespaced(client.clone(), namespace),
            idp: IdpClient::new(config.idp_ca_bundle.as_deref())?,
            config,
        })
    }

    async fn primary_secret(&self, reporter: &StatusReporter<'_>) -> Result<Secret> {
        match self.secrets.get_opt(&self.config.primary_secret).await? {
            Some(secret) => Ok(secret),
            None => Err(reporter
                .fail(&format!(
                    "Secret {} not found; it must be pre-created by the install pipeline",
                    self.config.primary_secret
                ))
                .await),
        }
    }

    /// Whether any field manager touched the primary secret within the
    /// freshness window. A fresh rotation means the running workloads still
    /// hold the old identity and must be drained.
    pub async fn primary_secret_recently_updated(&self) -> Result<bool> {
        Ok(self
            .secrets
            .get_opt(&self.config.primary_secret)
            .await?
            .map(|s| is_recently_updated(&s, Utc::now()))
            .unwrap_or(false))
    }

    /// Fetch and store the IDP signing keys when the stored value is a
    /// generation sentinel. No-op when auth is disabled.
    pub async fn ensure_jwk(
        &self,
        spec: &WorkflowServiceSpec,
        reporter: &StatusReporter<'_>,
    ) -> Result<()> {
        if !spec.common.auth.enable {
            return Ok(());
        }
        let secret = self.primary_secret(reporter).await?;
        let exponent = secret_value(&secret, "jwk-exponent");
        let modulus = secret_value(&secret, "jwk-modulus");
        if !needs_generation(exponent.as_deref()) && !needs_generation(modulus.as_deref()) {
            debug!("signing key already present");
            return Ok(());
        }
        let Some(server) = spec.common.auth.idp_endpoint() else {
            return Err(reporter
                .fail("Auth is enabled but common.auth.idpServer is not set")
                .await);
        };
        let key = self
            .idp
            .fetch_signing_key(server, &spec.common.auth.auth_type)
            .await?;
        patch_secret_values(
            &self.secrets,
            &self.config.primary_secret,
            serde_json::json!({
                "jwk-exponent": key.exponent,
                "jwk-modulus": key.modulus,
            }),
        )
        .await?;
        info!("stored signing key in '{}'", self.config.primary_secret);
        Ok(())
    }

    /// Ensure the workload has IDP client credentials. Returns whether the
    /// identity changed, which obsoletes the broker topology.
    ///
    /// Three modes, in precedence order: an external identity broker owns
    /// the account and we only rotate the local password when the upstream
    /// username moves; the account was pre-created and nothing is generated;
    /// otherwise the client self-registers with a one-time token.
    pub async fn ensure_idp_client(
        &self,
        spec: &WorkflowServiceSpec,
        namespace: &str,
        reporter: &StatusReporter<'_>,
    ) -> Result<bool> {
        if !spec.common.auth.enable {
            return Ok(false);
        }

        if spec.workflow.identity_broker_enabled {
            return self.rotate_for_identity_broker(spec, namespace, reporter).await;
        }

        if spec.common.auth.idp_user_precreated {
            debug!("IDP account pre-created, skipping client generation");
            return Ok(false);
        }

        let secret = self.primary_secret(reporter).await?;
        if !needs_generation(secret_value(&secret, "client-secret").as_deref()) {
            return Ok(false);
        }
        let Some(server) = spec.common.auth.idp_endpoint() else {
            return Err(reporter
                .fail("Auth is enabled but common.auth.idpServer is not set")
                .await);
        };
        let Some(token) = usable_secret_value(&secret, "registration-token") else {
            return Err(reporter
                .fail("Client self-registration requires a registration-token in the secret")
                .await);
        };
        let client_name = format!("{namespace}_workflow");
        let creds = self
            .idp
            .register_client(server, &token, &client_name)
            .await?;
        patch_secret_values(
            &self.secrets,
            &self.config.primary_secret,
            serde_json::json!({
                "client-id": creds.client_id,
                "client-secret": creds.client_secret,
            }),
        )
        .await?;
        info!("registered IDP client '{client_name}'");
        Ok(true)
    }

    /// Identity-broker mode: the broker maintains the account in the
    /// dedicated credentials secret; we mirror the username into the primary
    /// secret and mint a fresh random password whenever it moves.
    async fn rotate_for_identity_broker(
        &self,
        spec: &WorkflowServiceSpec,
        namespace: &str,
        reporter: &StatusReporter<'_>,
    ) -> Result<bool> {
        let expected = spec
            .common
            .auth
            .identity_username
            .clone()
            .unwrap_or_else(|| format!("{namespace}_workflow"));
        let creds_secret = match self
            .secrets
            .get_opt(&self.config.client_credentials_secret)
            .await?
        {
            Some(secret) => secret,
            None => {
                info!(
                    "creating broker credentials secret '{}' for '{expected}'",
                    self.config.client_credentials_secret
                );
                let body =
                    identity_broker_secret(&self.config.client_credentials_secret, &expected);
                self.secrets.create(&PostParams::default(), &body).await?
            }
        };
        let upstream = secret_value(&creds_secret, "username").unwrap_or(expected);

        let primary = self.primary_secret(reporter).await?;
        let recorded = secret_value(&primary, "idp-username");
        if recorded.as_deref() == Some(upstream.as_str()) {
            return Ok(false);
        }

        if is_recently_updated(&primary, Utc::now()) {
            debug!("primary secret was just rotated by another actor, leaving it");
            return Ok(false);
        }

        info!("identity username changed, rotating local password");
        patch_secret_values(
            &self.secrets,
            &self.config.primary_secret,
            serde_json::json!({
                "idp-username": upstream,
                "idp-password": random_password(),
            }),
        )
        .await?;
        Ok(true)
    }

    /// Admin client for the broker management API, using the admin account
    /// stored in the primary secret.
    pub async fn broker_admin(
        &self,
        spec: &WorkflowServiceSpec,
        reporter: &StatusReporter<'_>,
    ) -> Result<crate::broker::BrokerAdmin> {
        let secret = self.primary_secret(reporter).await?;
        let admin_user = secret_value(&secret, "broker-admin-user").unwrap_or_default();
        let admin_password = secret_value(&secret, "broker-admin-password").unwrap_or_default();
        Ok(crate::broker::BrokerAdmin::new(
            &spec.common.broker.host,
            &admin_user,
            &admin_password,
        ))
    }

    /// Provision the messaging account: vhost, user and permissions, with
    /// the default-identity skips applied by the admin client.
    pub async fn ensure_broker_account(
        &self,
        spec: &WorkflowServiceSpec,
        reporter: &StatusReporter<'_>,
    ) -> Result<()> {
        let secret = self.primary_secret(reporter).await?;
        let admin_user = secret_value(&secret, "broker-admin-user").unwrap_or_default();
        let admin_password = secret_value(&secret, "broker-admin-password").unwrap_or_default();
        let user = secret_value(&secret, "broker-user").unwrap_or_default();
        let mut password = secret_value(&secret, "broker-password");

        if needs_generation(password.as_deref()) {
            let generated = random_password();
            patch_secret_values(
                &self.secrets,
                &self.config.primary_secret,
                serde_json::json!({"broker-password": generated}),
            )
            .await?;
            password = Some(generated);
        }

        let admin = crate::broker::BrokerAdmin::new(
            &spec.common.broker.host,
            &admin_user,
            &admin_password,
        );
        let vhost = &spec.common.broker.vhost;
        admin.ensure_vhost(vhost).await?;
        admin
            .ensure_user(&user, password.as_deref().unwrap_or_default())
            .await?;
        admin.ensure_permissions(vhost, &user).await?;
        Ok(())
    }
}
