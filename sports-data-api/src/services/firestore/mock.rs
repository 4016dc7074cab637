//! In-memory [`ClientFactory`] for tests and local development.

use super::{
    ClientFactory, ClientHandle, DatabaseHandle, EstablishError, ServiceAccountCredentials,
    StoreClient, StoreDatabase, StoreError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A factory invocation recorded by [`MockClientFactory`].
#[derive(Debug, Clone)]
pub enum FactoryCall {
    ServiceAccount(ServiceAccountCredentials),
    ApplicationDefault { project_id: Option<String> },
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<FactoryCall>>,
    bound: Mutex<Vec<String>>,
    constructions: AtomicUsize,
    pending_bind_failures: AtomicUsize,
}

impl MockState {
    fn record(&self, call: FactoryCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

/// Records every call and hands out [`MockClient`]s.
pub struct MockClientFactory {
    state: Arc<MockState>,
    collections: Vec<String>,
    existing_projects: Vec<String>,
    service_account_error: Option<EstablishError>,
    application_default_error: Option<EstablishError>,
    ambient_project_id: String,
    listing_error: Option<String>,
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            collections: Vec::new(),
            existing_projects: Vec::new(),
            service_account_error: None,
            application_default_error: None,
            ambient_project_id: "ambient-project".to_string(),
            listing_error: None,
        }
    }

    /// Collection ids every database handle reports, in this order.
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Pretends a handle for `project_id` was created earlier in the process.
    /// The handle reflects the factory's final configuration, whatever the
    /// builder order.
    pub fn with_existing_client(mut self, project_id: &str) -> Self {
        self.existing_projects.push(project_id.to_string());
        self
    }

    pub fn failing_service_account(mut self, error: EstablishError) -> Self {
        self.service_account_error = Some(error);
        self
    }

    pub fn failing_application_default(mut self, error: EstablishError) -> Self {
        self.application_default_error = Some(error);
        self
    }

    /// Project reported when application default is used without one.
    pub fn with_ambient_project_id(mut self, project_id: &str) -> Self {
        self.ambient_project_id = project_id.to_string();
        self
    }

    pub fn failing_listing(mut self, message: &str) -> Self {
        self.listing_error = Some(message.to_string());
        self
    }

    /// The next `count` database bindings fail with [`StoreError::Unavailable`].
    pub fn fail_next_binds(self, count: usize) -> Self {
        self.state
            .pending_bind_failures
            .store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<FactoryCall> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Handles created through `from_*` calls.
    pub fn construction_count(&self) -> usize {
        self.state.constructions.load(Ordering::SeqCst)
    }

    /// Successful database bindings across every client.
    pub fn bind_count(&self) -> usize {
        self.bound_database_ids().len()
    }

    pub fn bound_database_ids(&self) -> Vec<String> {
        self.state
            .bound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn client(&self, project_id: String) -> ClientHandle {
        Arc::new(MockClient {
            project_id,
            collections: self.collections.clone(),
            listing_error: self.listing_error.clone(),
            state: self.state.clone(),
        })
    }

    fn construct(&self, project_id: String) -> ClientHandle {
        self.state.constructions.fetch_add(1, Ordering::SeqCst);
        self.client(project_id)
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    fn existing(&self) -> Vec<ClientHandle> {
        self.existing_projects
            .iter()
            .map(|project_id| self.client(project_id.clone()))
            .collect()
    }

    async fn from_service_account(
        &self,
        credentials: ServiceAccountCredentials,
    ) -> Result<ClientHandle, EstablishError> {
        self.state
            .record(FactoryCall::ServiceAccount(credentials.clone()));

        match &self.service_account_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.construct(credentials.project_id)),
        }
    }

    async fn from_application_default(
        &self,
        project_id: Option<&str>,
    ) -> Result<ClientHandle, EstablishError> {
        self.state.record(FactoryCall::ApplicationDefault {
            project_id: project_id.map(str::to_string),
        });

        match &self.application_default_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.construct(
                project_id
                    .map(str::to_string)
                    .unwrap_or_else(|| self.ambient_project_id.clone()),
            )),
        }
    }
}

#[derive(Debug)]
pub struct MockClient {
    project_id: String,
    collections: Vec<String>,
    listing_error: Option<String>,
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockState")
            .field("constructions", &self.constructions.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl StoreClient for MockClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn database(&self, database_id: &str) -> Result<DatabaseHandle, StoreError> {
        let failed = self
            .state
            .pending_bind_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable(format!(
                "database '{}' is not reachable",
                database_id
            )));
        }

        self.state
            .bound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(database_id.to_string());

        Ok(Arc::new(MockDatabase {
            project_id: self.project_id.clone(),
            database_id: database_id.to_string(),
            collections: self.collections.clone(),
            listing_error: self.listing_error.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct MockDatabase {
    project_id: String,
    database_id: String,
    collections: Vec<String>,
    listing_error: Option<String>,
}

#[async_trait]
impl StoreDatabase for MockDatabase {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn database_id(&self) -> &str {
        &self.database_id
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        match &self.listing_error {
            Some(message) => Err(StoreError::Unavailable(message.clone())),
            None => Ok(self.collections.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_failures_are_consumed() {
        let factory = MockClientFactory::new().fail_next_binds(1);
        let client = factory.from_application_default(Some("p")).await.unwrap();

        assert!(client.database("sports-data").is_err());
        assert!(client.database("sports-data").is_ok());
        assert_eq!(factory.bound_database_ids(), vec!["sports-data".to_string()]);
    }

    #[tokio::test]
    async fn test_existing_clients_are_not_constructions() {
        let factory = MockClientFactory::new().with_existing_client("earlier");
        assert_eq!(factory.existing().len(), 1);
        assert_eq!(factory.existing()[0].project_id(), "earlier");
        assert_eq!(factory.construction_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_client_sees_later_builder_settings() {
        let factory = MockClientFactory::new()
            .with_existing_client("earlier")
            .with_collections(["sports", "leagues"]);

        let client = factory.existing().remove(0);
        let database = client.database("sports-data").unwrap();
        assert_eq!(
            database.list_collections().await.unwrap(),
            vec!["sports".to_string(), "leagues".to_string()]
        );
    }
}
