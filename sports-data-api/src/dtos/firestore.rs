use serde::{Deserialize, Serialize};

pub const NOT_INITIALIZED_MESSAGE: &str =
    "Firestore not initialized. Check APP_PROJECT_ID and credentials \
     (APP_SA_CLIENT_EMAIL/APP_SA_PRIVATE_KEY or GOOGLE_APPLICATION_CREDENTIALS).";

/// Body of `GET /v1/firebase/test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirestoreTestResponse {
    pub connected: bool,
    pub database_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,
}

impl FirestoreTestResponse {
    pub fn disconnected(database_id: &str) -> Self {
        Self {
            connected: false,
            database_id: database_id.to_string(),
            message: NOT_INITIALIZED_MESSAGE.to_string(),
            collections: None,
        }
    }

    pub fn connected(database_id: &str, collections: Vec<String>) -> Self {
        Self {
            connected: true,
            database_id: database_id.to_string(),
            message: format!("Connected to database {}", database_id),
            collections: Some(collections),
        }
    }
}
