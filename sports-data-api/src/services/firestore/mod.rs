//! Document-store collaborators used by the connection manager.
//!
//! The manager only sees the traits in this module. [`GoogleClientFactory`]
//! talks to Firestore over its REST API; [`MockClientFactory`] is an
//! in-memory stand-in for tests and local development.

pub mod client;
pub mod credentials;
pub mod factory;
pub mod mock;

use async_trait::async_trait;
use secrecy::Secret;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub use client::{FirestoreClient, FirestoreDatabase};
pub use credentials::{AccessToken, Credential, TokenProvider};
pub use factory::{AmbientEnvironment, GoogleClientFactory};
pub use mock::{FactoryCall, MockClientFactory};

/// Credential-bound handle to a document-store project.
pub type ClientHandle = Arc<dyn StoreClient>;

/// Handle scoped to one database of a project.
pub type DatabaseHandle = Arc<dyn StoreDatabase>;

/// Explicit service-account material handed to [`ClientFactory::from_service_account`].
#[derive(Debug, Clone)]
pub struct ServiceAccountCredentials {
    pub project_id: String,
    pub client_email: String,
    /// PEM with real newlines.
    pub private_key: Secret<String>,
}

/// Why a client handle could not be established.
///
/// Never surfaces to callers of the connection manager; it is kept for
/// logging and inspection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EstablishError {
    #[error("invalid service account private key: {0}")]
    InvalidPrivateKey(String),

    #[error("failed to read credentials file {path}: {reason}")]
    CredentialsFile { path: String, reason: String },

    #[error("unsupported credential type '{0}'")]
    UnsupportedCredentialType(String),

    #[error("no application default credentials found")]
    NoApplicationDefault,

    #[error("project id could not be determined")]
    ProjectIdUnresolved,

    #[error("metadata server error: {0}")]
    Metadata(String),

    #[error("client construction failed: {0}")]
    Construction(String),
}

/// Failure talking to an established document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid database id '{0}'")]
    InvalidDatabaseId(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("document store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response from document store: {0}")]
    Decode(String),

    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Authenticated session bound to a project.
pub trait StoreClient: Send + Sync + fmt::Debug {
    fn project_id(&self) -> &str;

    /// Binds a handle to `database_id`.
    fn database(&self, database_id: &str) -> Result<DatabaseHandle, StoreError>;
}

#[async_trait]
pub trait StoreDatabase: Send + Sync + fmt::Debug {
    fn project_id(&self) -> &str;

    fn database_id(&self) -> &str;

    /// Top-level collection ids, in the order the store returns them.
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    fn collection(&self, name: &str) -> CollectionRef {
        CollectionRef::new(self.project_id(), self.database_id(), name)
    }
}

/// Creates client handles from the credential sources the manager selects.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Handles already created in this process, oldest first.
    fn existing(&self) -> Vec<ClientHandle>;

    async fn from_service_account(
        &self,
        credentials: ServiceAccountCredentials,
    ) -> Result<ClientHandle, EstablishError>;

    /// Uses credentials discovered from the execution environment. Without a
    /// `project_id`, the project is inferred from the same environment.
    async fn from_application_default(
        &self,
        project_id: Option<&str>,
    ) -> Result<ClientHandle, EstablishError>;
}

/// Lightweight pointer to a named collection. Cheap to derive, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    project_id: String,
    database_id: String,
    id: String,
}

impl CollectionRef {
    pub fn new(project_id: &str, database_id: &str, id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            database_id: database_id.to_string(),
            id: id.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Fully qualified resource name.
    pub fn path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents/{}",
            self.project_id, self.database_id, self.id
        )
    }
}

/// Process-wide list of client handles, shared between bootstrap steps.
#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: Arc<RwLock<Vec<ClientHandle>>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: ClientHandle) {
        if let Ok(mut apps) = self.apps.write() {
            apps.push(client);
        }
    }

    pub fn all(&self) -> Vec<ClientHandle> {
        self.apps
            .read()
            .map(|apps| apps.clone())
            .unwrap_or_default()
    }
}

/// Firestore database ids are `(default)` or 4-63 chars of `[a-z0-9-]`,
/// starting with a letter and not ending with a hyphen.
pub fn validate_database_id(database_id: &str) -> Result<(), StoreError> {
    if database_id == "(default)" {
        return Ok(());
    }

    let valid_chars = database_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let starts_with_letter = database_id
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase());

    if (4..=63).contains(&database_id.len())
        && valid_chars
        && starts_with_letter
        && !database_id.ends_with('-')
    {
        Ok(())
    } else {
        Err(StoreError::InvalidDatabaseId(database_id.to_string()))
    }
}
