//! Lazily established, process-lifetime Firestore handles.
//!
//! [`ConnectionManager`] owns the client handle and the database handle. The
//! first call to [`ConnectionManager::database`] picks a credential source,
//! asks the injected [`ClientFactory`] for a client and binds the configured
//! database. Both handles are then reused until the process exits.

use crate::config::{AppConfig, Environment};
use crate::services::firestore::{
    ClientFactory, ClientHandle, CollectionRef, DatabaseHandle, EstablishError,
    ServiceAccountCredentials, StoreError,
};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Firestore not initialized (missing credentials or test env)")]
    NotInitialized,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ConnectionError> for AppError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotInitialized => AppError::ServiceUnavailable,
            ConnectionError::Store(err) => AppError::BadGateway(err.to_string()),
        }
    }
}

/// How the current client handle was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unset,
    /// Found an in-process handle created earlier.
    Reusing,
    /// Service-account email and private key from configuration.
    Explicit,
    /// Credentials discovered from the execution environment.
    ImplicitDefault,
    /// The last attempt produced no handle.
    Unavailable,
}

impl ClientState {
    fn as_str(&self) -> &'static str {
        match self {
            ClientState::Unset => "unset",
            ClientState::Reusing => "reusing",
            ClientState::Explicit => "explicit",
            ClientState::ImplicitDefault => "implicit_default",
            ClientState::Unavailable => "unavailable",
        }
    }
}

struct Handles {
    state: ClientState,
    client: Option<ClientHandle>,
    database: Option<DatabaseHandle>,
    last_error: Option<EstablishError>,
}

pub struct ConnectionManager {
    environment: Environment,
    project_id: Option<String>,
    database_id: String,
    client_email: Option<String>,
    private_key: Option<Secret<String>>,
    factory: Arc<dyn ClientFactory>,
    handles: Mutex<Handles>,
}

impl ConnectionManager {
    pub fn new(config: &AppConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            environment: config.environment,
            project_id: config.project_id.clone(),
            database_id: config.database_id.clone(),
            client_email: config.service_account_email.clone(),
            private_key: config.service_account_private_key.clone(),
            factory,
            handles: Mutex::new(Handles {
                state: ClientState::Unset,
                client: None,
                database: None,
                last_error: None,
            }),
        }
    }

    /// Database id handles are bound to.
    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub async fn client_state(&self) -> ClientState {
        self.handles.lock().await.state
    }

    /// Why the most recent establishment attempt produced no handle.
    pub async fn last_establish_error(&self) -> Option<EstablishError> {
        self.handles.lock().await.last_error.clone()
    }

    /// Returns the shared database handle, establishing it on first use.
    ///
    /// `Ok(None)` means no credentials could be found. Nothing is cached in
    /// that case, so a later call tries again. Once a handle is returned,
    /// every subsequent call returns the same `Arc`.
    pub async fn database(&self) -> Result<Option<DatabaseHandle>, ConnectionError> {
        let mut handles = self.handles.lock().await;

        if let Some(database) = &handles.database {
            return Ok(Some(database.clone()));
        }

        let client = match handles.client.clone() {
            Some(client) => client,
            None => match self.establish(&mut handles).await {
                Some(client) => client,
                None => return Ok(None),
            },
        };

        let database = client.database(&self.database_id).map_err(|err| {
            tracing::error!(
                database_id = %self.database_id,
                error = %err,
                "Failed to bind Firestore database"
            );
            err
        })?;

        tracing::info!(
            project_id = %client.project_id(),
            database_id = %self.database_id,
            "Firestore database bound"
        );
        handles.database = Some(database.clone());
        Ok(Some(database))
    }

    /// Reference to the named collection. Not cached.
    pub async fn collection(
        &self,
        name: impl AsRef<str>,
    ) -> Result<CollectionRef, ConnectionError> {
        let database = self
            .database()
            .await?
            .ok_or(ConnectionError::NotInitialized)?;
        Ok(database.collection(name.as_ref()))
    }

    async fn establish(&self, handles: &mut Handles) -> Option<ClientHandle> {
        let Some((state, result)) = self.select_client().await else {
            tracing::debug!("No project id in test environment; Firestore disabled");
            handles.state = ClientState::Unavailable;
            handles.last_error = None;
            return None;
        };

        metrics::counter!(
            "firestore_client_establish_total",
            "outcome" => match &result {
                Ok(_) => state.as_str(),
                Err(_) => ClientState::Unavailable.as_str(),
            }
        )
        .increment(1);

        match result {
            Ok(client) => {
                tracing::info!(
                    source = state.as_str(),
                    project_id = %client.project_id(),
                    "Firestore client established"
                );
                handles.state = state;
                handles.client = Some(client.clone());
                handles.last_error = None;
                Some(client)
            }
            Err(err) => {
                tracing::warn!(
                    attempted = state.as_str(),
                    error = %err,
                    "Firestore unavailable; diagnostics disabled"
                );
                handles.state = ClientState::Unavailable;
                handles.last_error = Some(err);
                None
            }
        }
    }

    /// Picks a credential source and asks the factory for a client. The
    /// returned state names the source that was attempted. `None` means no
    /// source applies and nothing was attempted.
    async fn select_client(&self) -> Option<(ClientState, Result<ClientHandle, EstablishError>)> {
        if let Some(existing) = self.factory.existing().into_iter().next() {
            return Some((ClientState::Reusing, Ok(existing)));
        }

        let Some(project_id) = self.project_id.as_deref() else {
            if self.environment == Environment::Test {
                return None;
            }
            return Some((
                ClientState::ImplicitDefault,
                self.factory.from_application_default(None).await,
            ));
        };

        if let (Some(client_email), Some(private_key)) = (&self.client_email, &self.private_key) {
            let credentials = ServiceAccountCredentials {
                project_id: project_id.to_string(),
                client_email: client_email.clone(),
                private_key: Secret::new(unescape_newlines(private_key.expose_secret())),
            };
            return Some((
                ClientState::Explicit,
                self.factory.from_service_account(credentials).await,
            ));
        }

        Some((
            ClientState::ImplicitDefault,
            self.factory.from_application_default(Some(project_id)).await,
        ))
    }
}

/// Keys pasted into env files usually carry literal `\n` sequences.
fn unescape_newlines(key: &str) -> String {
    key.replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_newlines() {
        assert_eq!(
            unescape_newlines("-----BEGIN-----\\nabc\\n-----END-----"),
            "-----BEGIN-----\nabc\n-----END-----"
        );
        assert_eq!(unescape_newlines("already\nreal"), "already\nreal");
    }

    #[test]
    fn test_connection_error_maps_to_app_error() {
        assert!(matches!(
            AppError::from(ConnectionError::NotInitialized),
            AppError::ServiceUnavailable
        ));
        assert!(matches!(
            AppError::from(ConnectionError::Store(StoreError::Unavailable("down".into()))),
            AppError::BadGateway(_)
        ));
    }
}
