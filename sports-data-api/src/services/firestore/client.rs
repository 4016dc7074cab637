//! Firestore REST client and database handles.

use super::credentials::TokenProvider;
use super::{validate_database_id, DatabaseHandle, StoreClient, StoreDatabase, StoreError};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

const LIST_PAGE_SIZE: u32 = 300;

struct ClientInner {
    project_id: String,
    base_url: String,
    http: reqwest::Client,
    tokens: TokenProvider,
}

/// Client handle for one Firestore project.
#[derive(Clone)]
pub struct FirestoreClient {
    inner: Arc<ClientInner>,
}

impl FirestoreClient {
    pub fn new(
        project_id: impl Into<String>,
        base_url: impl Into<String>,
        http: reqwest::Client,
        tokens: TokenProvider,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                project_id: project_id.into(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                http,
                tokens,
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn credential_kind(&self) -> &'static str {
        self.inner.tokens.credential().kind()
    }
}

impl fmt::Debug for FirestoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirestoreClient")
            .field("project_id", &self.inner.project_id)
            .field("base_url", &self.inner.base_url)
            .field("credential", self.inner.tokens.credential())
            .finish()
    }
}

impl StoreClient for FirestoreClient {
    fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    fn database(&self, database_id: &str) -> Result<DatabaseHandle, StoreError> {
        validate_database_id(database_id)?;

        Ok(Arc::new(FirestoreDatabase {
            client: self.inner.clone(),
            database_id: database_id.to_string(),
        }))
    }
}

/// Handle bound to `projects/{project}/databases/{database}`.
pub struct FirestoreDatabase {
    client: Arc<ClientInner>,
    database_id: String,
}

impl FirestoreDatabase {
    fn documents_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.client.base_url, self.client.project_id, self.database_id
        )
    }
}

impl fmt::Debug for FirestoreDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirestoreDatabase")
            .field("project_id", &self.client.project_id)
            .field("database_id", &self.database_id)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListCollectionIdsRequest {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCollectionIdsResponse {
    #[serde(default)]
    collection_ids: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
impl StoreDatabase for FirestoreDatabase {
    fn project_id(&self) -> &str {
        &self.client.project_id
    }

    fn database_id(&self) -> &str {
        &self.database_id
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let url = format!("{}:listCollectionIds", self.documents_url());
        let mut collection_ids = Vec::new();
        let mut page_token = None;

        loop {
            let token = self.client.tokens.token().await?;
            let request = ListCollectionIdsRequest {
                page_size: LIST_PAGE_SIZE,
                page_token: page_token.take(),
            };

            let response = self
                .client
                .http
                .post(&url)
                .bearer_auth(token.expose_secret())
                .json(&request)
                .send()
                .await
                .map_err(|source| StoreError::Transport {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    status = status.as_u16(),
                    database_id = %self.database_id,
                    "listCollectionIds failed"
                );
                return Err(StoreError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: ListCollectionIdsResponse = response
                .json()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            collection_ids.extend(page.collection_ids);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(collection_ids)
    }
}
