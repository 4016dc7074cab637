//! Google credential discovery and client construction.

use super::client::{FirestoreClient, FIRESTORE_BASE_URL};
use super::credentials::{
    load_credentials_file, Credential, LoadedCredentials, ServiceAccountSigner, TokenProvider,
    METADATA_FLAVOR_HEADER,
};
use super::{
    AppRegistry, ClientFactory, ClientHandle, EstablishError, ServiceAccountCredentials,
    StoreError,
};
use crate::config::AppConfig;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Places application-default discovery is allowed to look.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnvironment {
    /// `GOOGLE_APPLICATION_CREDENTIALS`.
    pub credentials_file: Option<PathBuf>,
    /// gcloud's `application_default_credentials.json`.
    pub well_known_file: Option<PathBuf>,
    /// `GOOGLE_CLOUD_PROJECT` / `GCLOUD_PROJECT`.
    pub project_id: Option<String>,
    /// `None` skips the metadata server check.
    pub metadata_base_url: Option<String>,
    /// `host:port` of a Firestore emulator.
    pub emulator_host: Option<String>,
}

impl AmbientEnvironment {
    pub fn from_config(config: &AppConfig) -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let gcloud_dir = var("CLOUDSDK_CONFIG").map(PathBuf::from).or_else(|| {
            if cfg!(windows) {
                var("APPDATA").map(|dir| PathBuf::from(dir).join("gcloud"))
            } else {
                var("HOME").map(|dir| PathBuf::from(dir).join(".config").join("gcloud"))
            }
        });

        Self {
            credentials_file: config.credentials_file.clone(),
            well_known_file: gcloud_dir.map(|dir| dir.join("application_default_credentials.json")),
            project_id: var("GOOGLE_CLOUD_PROJECT").or_else(|| var("GCLOUD_PROJECT")),
            metadata_base_url: Some(format!(
                "http://{}",
                var("GCE_METADATA_HOST").unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string())
            )),
            emulator_host: config.firestore_emulator_host.clone(),
        }
    }
}

/// Builds [`FirestoreClient`] handles and records them in an [`AppRegistry`].
pub struct GoogleClientFactory {
    ambient: AmbientEnvironment,
    registry: AppRegistry,
    http: reqwest::Client,
    base_url: String,
}

impl GoogleClientFactory {
    pub fn new(ambient: AmbientEnvironment, registry: AppRegistry) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| StoreError::Transport {
                url: FIRESTORE_BASE_URL.to_string(),
                source,
            })?;

        let base_url = match &ambient.emulator_host {
            Some(host) => format!("http://{}/v1", host),
            None => FIRESTORE_BASE_URL.to_string(),
        };

        Ok(Self {
            ambient,
            registry,
            http,
            base_url,
        })
    }

    pub fn from_config(config: &AppConfig, registry: AppRegistry) -> Result<Self, StoreError> {
        Self::new(AmbientEnvironment::from_config(config), registry)
    }

    /// Overrides the REST endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build(&self, project_id: String, credential: Credential) -> ClientHandle {
        tracing::info!(
            project_id = %project_id,
            credential = credential.kind(),
            "Creating Firestore client"
        );

        let tokens = TokenProvider::new(credential, self.http.clone());
        let client: ClientHandle = Arc::new(FirestoreClient::new(
            project_id,
            self.base_url.clone(),
            self.http.clone(),
            tokens,
        ));
        self.registry.register(client.clone());
        client
    }

    /// Application-default credential chain: explicit credentials file, the
    /// gcloud well-known file, then the metadata server.
    async fn discover(&self) -> Result<LoadedCredentials, EstablishError> {
        if let Some(path) = &self.ambient.credentials_file {
            tracing::debug!(path = %path.display(), "Using GOOGLE_APPLICATION_CREDENTIALS");
            return load_credentials_file(path).await;
        }

        if let Some(path) = self.ambient.well_known_file.as_ref().filter(|p| p.is_file()) {
            tracing::debug!(path = %path.display(), "Using gcloud application default credentials");
            return load_credentials_file(path).await;
        }

        if let Some(base_url) = &self.ambient.metadata_base_url {
            if self.metadata_available(base_url).await {
                tracing::debug!(base_url = %base_url, "Using metadata server credentials");
                return Ok(LoadedCredentials {
                    credential: Credential::Metadata {
                        base_url: base_url.clone(),
                    },
                    project_id: None,
                });
            }
        }

        Err(EstablishError::NoApplicationDefault)
    }

    async fn metadata_available(&self, base_url: &str) -> bool {
        let response = self
            .http
            .get(base_url)
            .header(METADATA_FLAVOR_HEADER, "Google")
            .timeout(METADATA_CHECK_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(response) => response
                .headers()
                .get(METADATA_FLAVOR_HEADER)
                .and_then(|v| v.to_str().ok())
                == Some("Google"),
            Err(_) => false,
        }
    }

    async fn metadata_project_id(&self, base_url: &str) -> Result<String, EstablishError> {
        let url = format!("{}/computeMetadata/v1/project/project-id", base_url);
        let response = self
            .http
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, "Google")
            .timeout(METADATA_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| EstablishError::Metadata(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EstablishError::Metadata(format!(
                "project-id lookup returned {}",
                response.status().as_u16()
            )));
        }

        let project_id = response
            .text()
            .await
            .map_err(|e| EstablishError::Metadata(e.to_string()))?;
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(EstablishError::ProjectIdUnresolved);
        }
        Ok(project_id.to_string())
    }

    /// Explicit id, then the credential's own project, then the environment,
    /// then the metadata server.
    async fn resolve_project_id(
        &self,
        explicit: Option<&str>,
        loaded: &LoadedCredentials,
    ) -> Result<String, EstablishError> {
        if let Some(project_id) = explicit
            .map(str::to_string)
            .or_else(|| loaded.project_id.clone())
            .or_else(|| self.ambient.project_id.clone())
        {
            return Ok(project_id);
        }

        match &loaded.credential {
            Credential::Metadata { base_url } => self.metadata_project_id(base_url).await,
            _ => Err(EstablishError::ProjectIdUnresolved),
        }
    }
}

#[async_trait]
impl ClientFactory for GoogleClientFactory {
    fn existing(&self) -> Vec<ClientHandle> {
        self.registry.all()
    }

    async fn from_service_account(
        &self,
        credentials: ServiceAccountCredentials,
    ) -> Result<ClientHandle, EstablishError> {
        let signer = ServiceAccountSigner::new(
            &credentials.client_email,
            credentials.private_key.expose_secret(),
            None,
            None,
        )?;

        let credential = if self.ambient.emulator_host.is_some() {
            Credential::Emulator
        } else {
            Credential::ServiceAccount(signer)
        };

        Ok(self.build(credentials.project_id, credential))
    }

    async fn from_application_default(
        &self,
        project_id: Option<&str>,
    ) -> Result<ClientHandle, EstablishError> {
        if self.ambient.emulator_host.is_some() {
            let project_id = project_id
                .map(str::to_string)
                .or_else(|| self.ambient.project_id.clone())
                .ok_or(EstablishError::ProjectIdUnresolved)?;
            return Ok(self.build(project_id, Credential::Emulator));
        }

        let loaded = self.discover().await?;
        let project_id = self.resolve_project_id(project_id, &loaded).await?;
        Ok(self.build(project_id, loaded.credential))
    }
}
