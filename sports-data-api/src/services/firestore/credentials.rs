//! OAuth2 access tokens for the Firestore REST API.

use super::{EstablishError, StoreError};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::Mutex;

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const FIRESTORE_SCOPES: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/datastore";
pub const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";

/// Token the Firestore emulator accepts for full access.
pub const EMULATOR_TOKEN: &str = "owner";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Signs JWT bearer assertions for a service account.
#[derive(Clone)]
pub struct ServiceAccountSigner {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    key: EncodingKey,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountSigner {
    /// Parses the PEM up front so a bad key is rejected before any request.
    pub fn new(
        client_email: &str,
        private_key_pem: &str,
        key_id: Option<String>,
        token_uri: Option<String>,
    ) -> Result<Self, EstablishError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| EstablishError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self {
            client_email: client_email.to_string(),
            key_id,
            token_uri: token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string()),
            key,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, StoreError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: FIRESTORE_SCOPES,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        encode(&header, &claims, &self.key)
            .map_err(|e| StoreError::Auth(format!("failed to sign assertion: {}", e)))
    }
}

/// Refresh-token credentials written by `gcloud auth application-default login`.
#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub refresh_token: Secret<String>,
    #[serde(default)]
    pub quota_project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Deserialize)]
struct ServiceAccountFile {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    private_key_id: Option<String>,
    client_email: String,
    private_key: Secret<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// A source of access tokens.
#[derive(Clone)]
pub enum Credential {
    ServiceAccount(ServiceAccountSigner),
    AuthorizedUser(AuthorizedUser),
    /// GCE / Cloud Run metadata server at `base_url`.
    Metadata { base_url: String },
    Emulator,
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ServiceAccount(_) => "service_account",
            Credential::AuthorizedUser(_) => "authorized_user",
            Credential::Metadata { .. } => "metadata",
            Credential::Emulator => "emulator",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ServiceAccount(signer) => f
                .debug_struct("ServiceAccount")
                .field("client_email", &signer.client_email)
                .finish_non_exhaustive(),
            Credential::AuthorizedUser(user) => f
                .debug_struct("AuthorizedUser")
                .field("client_id", &user.client_id)
                .finish_non_exhaustive(),
            Credential::Metadata { base_url } => f
                .debug_struct("Metadata")
                .field("base_url", base_url)
                .finish(),
            Credential::Emulator => f.write_str("Emulator"),
        }
    }
}

/// Parsed credentials file plus the project id it names, if any.
#[derive(Debug)]
pub struct LoadedCredentials {
    pub credential: Credential,
    pub project_id: Option<String>,
}

/// Reads a `GOOGLE_APPLICATION_CREDENTIALS`-style JSON file.
pub async fn load_credentials_file(path: &Path) -> Result<LoadedCredentials, EstablishError> {
    let file_error = |reason: String| EstablishError::CredentialsFile {
        path: path.display().to_string(),
        reason,
    };

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| file_error(e.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| file_error(e.to_string()))?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("service_account") => {
            let file: ServiceAccountFile =
                serde_json::from_value(value).map_err(|e| file_error(e.to_string()))?;
            let signer = ServiceAccountSigner::new(
                &file.client_email,
                file.private_key.expose_secret(),
                file.private_key_id,
                file.token_uri,
            )?;
            Ok(LoadedCredentials {
                credential: Credential::ServiceAccount(signer),
                project_id: file.project_id,
            })
        }
        Some("authorized_user") => {
            let user: AuthorizedUser =
                serde_json::from_value(value).map_err(|e| file_error(e.to_string()))?;
            let project_id = user.quota_project_id.clone();
            Ok(LoadedCredentials {
                credential: Credential::AuthorizedUser(user),
                project_id,
            })
        }
        Some(other) => Err(EstablishError::UnsupportedCredentialType(other.to_string())),
        None => Err(file_error("missing \"type\" field".to_string())),
    }
}

/// Bearer token with its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub value: Secret<String>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out access tokens for one credential, refreshing shortly before expiry.
pub struct TokenProvider {
    credential: Credential,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(credential: Credential, http: reqwest::Client) -> Self {
        Self {
            credential,
            http,
            cached: Mutex::new(None),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub async fn token(&self) -> Result<Secret<String>, StoreError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        tracing::debug!(
            credential = self.credential.kind(),
            expires_at = %token.expires_at,
            "Fetched access token"
        );
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch(&self) -> Result<AccessToken, StoreError> {
        match &self.credential {
            Credential::ServiceAccount(signer) => {
                let assertion = signer.assertion(Utc::now())?;
                self.exchange(
                    &signer.token_uri,
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
                )
                .await
            }
            Credential::AuthorizedUser(user) => {
                let token_uri = user.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URI);
                self.exchange(
                    token_uri,
                    &[
                        ("grant_type", "refresh_token"),
                        ("client_id", user.client_id.as_str()),
                        ("client_secret", user.client_secret.expose_secret().as_str()),
                        ("refresh_token", user.refresh_token.expose_secret().as_str()),
                    ],
                )
                .await
            }
            Credential::Metadata { base_url } => {
                let url = format!(
                    "{}/computeMetadata/v1/instance/service-accounts/default/token",
                    base_url
                );
                let response = self
                    .http
                    .get(&url)
                    .header(METADATA_FLAVOR_HEADER, "Google")
                    .send()
                    .await
                    .map_err(|source| StoreError::Transport { url, source })?;
                read_token(response).await
            }
            Credential::Emulator => Ok(AccessToken {
                value: Secret::new(EMULATOR_TOKEN.to_string()),
                expires_at: Utc::now() + Duration::days(365),
            }),
        }
    }

    async fn exchange(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<AccessToken, StoreError> {
        let response = self
            .http
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: token_uri.to_string(),
                source,
            })?;
        read_token(response).await
    }
}

async fn read_token(response: reqwest::Response) -> Result<AccessToken, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Auth(format!(
            "token endpoint returned {}: {}",
            status.as_u16(),
            body
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))?;

    let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
    Ok(AccessToken {
        value: Secret::new(token.access_token),
        expires_at: Utc::now() + Duration::seconds(lifetime),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_private_key() {
        let result =
            ServiceAccountSigner::new("sa@project.iam.gserviceaccount.com", "fake-key", None, None);
        assert!(matches!(result, Err(EstablishError::InvalidPrivateKey(_))));
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let token = AccessToken {
            value: Secret::new("t".to_string()),
            expires_at: now + Duration::seconds(30),
        };
        assert!(!token.is_fresh(now));

        let token = AccessToken {
            value: Secret::new("t".to_string()),
            expires_at: now + Duration::seconds(600),
        };
        assert!(token.is_fresh(now));
    }

    #[tokio::test]
    async fn test_emulator_token_is_static() {
        let provider = TokenProvider::new(Credential::Emulator, reqwest::Client::new());
        let token = provider.token().await.unwrap();
        assert_eq!(token.expose_secret(), EMULATOR_TOKEN);
    }

    #[tokio::test]
    async fn test_unsupported_credential_type() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"type": "external_account"}"#).unwrap();

        let err = load_credentials_file(file.path()).await.unwrap_err();
        assert_eq!(
            err,
            EstablishError::UnsupportedCredentialType("external_account".to_string())
        );
    }
}
