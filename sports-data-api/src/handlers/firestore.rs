use crate::dtos::FirestoreTestResponse;
use crate::services::ConnectionManager;
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;

/// Reports whether a database handle exists and lists its top-level
/// collections. A missing handle is a normal answer, not an error.
pub async fn diagnose(
    manager: &ConnectionManager,
    database_id: &str,
) -> Result<FirestoreTestResponse, AppError> {
    let Some(database) = manager.database().await? else {
        return Ok(FirestoreTestResponse::disconnected(database_id));
    };

    let collections = database.list_collections().await.map_err(|e| {
        tracing::error!(database_id = %database_id, error = %e, "Failed to list collections");
        AppError::BadGateway(e.to_string())
    })?;

    Ok(FirestoreTestResponse::connected(database_id, collections))
}

/// GET /v1/firebase/test
#[tracing::instrument(skip(state))]
pub async fn test_connection(
    State(state): State<AppState>,
) -> Result<Json<FirestoreTestResponse>, AppError> {
    let response = diagnose(&state.connection, &state.config.database_id).await?;
    Ok(Json(response))
}
