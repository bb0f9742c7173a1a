use crate::errors::{Error, Result};
use serde::Deserialize;
use tracing::info;

const KEYCLOAK_AUTH_TYPE: &str = "keycloak-oidc";
const KEYCLOAK_REALM: &str = "cloud-common";

/// Credentials of a client registered with the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// RSA signing key material from the provider's JWK document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningKey {
    pub exponent: String,
    pub modulus: String,
}

/// First key in a JWK document carrying both RSA components.
pub fn parse_signing_key(doc: &serde_json::Value) -> Option<SigningKey> {
    doc.get("keys")?.as_array()?.iter().find_map(|key| {
        Some(SigningKey {
            exponent: key.get("e")?.as_str()?.to_string(),
            modulus: key.get("n")?.as_str()?.to_string(),
        })
    })
}

#[derive(Deserialize)]
struct RegistrationResponse {
    #[serde(rename = "clientId")]
    client_id: String,
    secret: String,
}

/// JWK discovery URL for the configured provider flavour. Keycloak exposes
/// signing keys under the realm's OIDC certs endpoint, everything else under
/// a plain `/jwk` path.
pub fn jwk_url(server: &str, auth_type: &str) -> String {
    let server = server.trim_end_matches('/');
    if auth_type == KEYCLOAK_AUTH_TYPE {
        format!("{server}/auth/realms/{KEYCLOAK_REALM}/protocol/openid-connect/certs")
    } else {
        format!("{server}/jwk")
    }
}

/// Client for the identity provider, verified against the operator's CA
/// bundle when one is mounted.
pub struct IdpClient {
    http: reqwest::Client,
}

impl IdpClient {
    pub fn new(ca_bundle_pem: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = ca_bundle_pem {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| Error::HttpError(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| Error::HttpError(format!("could not build IDP client: {e}")))?;
        Ok(Self { http })
    }

    /// Fetch the provider's token-signing key.
    pub async fn fetch_signing_key(&self, server: &str, auth_type: &str) -> Result<SigningKey> {
        let url = jwk_url(server, auth_type);
        info!("fetching JWK from {url}");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpError(format!(
                "JWK endpoint returned {}",
                response.status()
            )));
        }
        let doc: serde_json::Value = response.json().await?;
        parse_signing_key(&doc)
            .ok_or_else(|| Error::HttpError(format!("no usable RSA key in JWK document from {url}")))
    }

    /// Self-register a client using a registration access token.
    pub async fn register_client(
        &self,
        server: &str,
        registration_token: &str,
        client_name: &str,
    ) -> Result<ClientCredentials> {
        let server = server.trim_end_matches('/');
        let url =
            format!("{server}/auth/realms/{KEYCLOAK_REALM}/clients-registrations/default");
        info!("registering client '{client_name}' at {url}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(registration_token)
            .json(&serde_json::json!({"clientId": client_name}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::HttpError(format!(
                "client registration returned {}",
                response.status()
            )));
        }
        let body: RegistrationResponse = response.json().await?;
        Ok(ClientCredentials {
            client_id: body.client_id,
            client_secret: body.secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwk_url_depends_on_provider_flavour() {
        assert_eq!(
            jwk_url("https://idp.local", "keycloak-oidc"),
            "https://idp.local/auth/realms/cloud-common/protocol/openid-connect/certs"
        );
        assert_eq!(jwk_url("https://idp.local/", "mitreid"), "https://idp.local/jwk");
    }

    #[test]
    fn signing_key_parses_first_complete_rsa_key() {
        let doc = serde_json::json!({
            "keys": [
                {"kty": "EC", "crv": "P-256"},
                {"kty": "RSA", "e": "AQAB", "n": "0vx7agoebGcQ"},
            ]
        });
        assert_eq!(
            parse_signing_key(&doc),
            Some(SigningKey {
                exponent: "AQAB".to_string(),
                modulus: "0vx7agoebGcQ".to_string(),
            })
        );
        assert_eq!(parse_signing_key(&serde_json::json!({"keys": []})), None);
        assert_eq!(parse_signing_key(&serde_json::json!({})), None);
    }
}
